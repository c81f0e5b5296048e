pub mod cms;
pub mod utils;

pub use cms::{CmsModel, ModelOptions};
