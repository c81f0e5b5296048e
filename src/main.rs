use std::error::Error;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::{ArgEnum, Parser, Subcommand};
use log::{error, info};

use cms::config::{Config, EngineConfig};
use cms::demand::{expected, DemandGenerator, DemandTable};
use cms::models::cms::{CmsModel, ModelOptions};
use cms::pipeline::{self, Pipeline};
use cms::problem::{DataInconsistency, Problem};
use cms::report::Reporter;
use cms::solver::external;
use cms::solver::{Engine, ExternalCommand, ExternalEngineFailure, MicrolpEngine};

#[derive(Parser)]
#[clap(name = "cms", version, about = "Production planning for cellular manufacturing systems")]
struct CommandLine {
    /// JSON configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ArgEnum)]
enum EngineKind {
    Microlp,
    Gurobi,
    External,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and solve the model of an instance
    Solve {
        instance: PathBuf,
        /// Print the report as JSON
        #[clap(long)]
        json: bool,
        #[clap(long, arg_enum)]
        engine: Option<EngineKind>,
        /// Program run by the external engine
        #[clap(long)]
        optimizer: Option<String>,
        /// Argument of the optimizer, `{model}` and `{results}` are replaced by the file paths
        #[clap(long = "optimizer-arg")]
        optimizer_args: Vec<String>,
        /// Time limit in seconds
        #[clap(long)]
        time_limit: Option<f64>,
        #[clap(long)]
        seed: Option<u64>,
        #[clap(long)]
        tolerance: Option<f64>,
    },
    /// Check an instance and print the size of its model
    Validate {
        instance: PathBuf,
        #[clap(long)]
        seed: Option<u64>,
    },
    /// Print the demand table drawn from the demand parameters of an instance
    Demand {
        instance: PathBuf,
        #[clap(long)]
        seed: Option<u64>,
        /// Print the rounded means instead of sampling
        #[clap(long)]
        expected: bool,
    },
    /// Report on a results file written by an external optimizer
    ParseResults {
        results: PathBuf,
        /// Print the report as JSON
        #[clap(long)]
        json: bool,
    },
}

fn read_problem(path: &Path) -> Result<Problem, DataInconsistency> {
    info!("reading {}", path.display());
    let file = File::open(path)
        .map_err(|e| DataInconsistency::Document(format!("{}: {}", path.display(), e)))?;
    Problem::from_reader(BufReader::new(file))
}

fn read_config(path: &Option<PathBuf>) -> Result<Config, Box<dyn Error>> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}

#[allow(clippy::too_many_arguments)]
fn solve(
    mut config: Config,
    instance: &Path,
    json: bool,
    engine: Option<EngineKind>,
    optimizer: Option<String>,
    optimizer_args: Vec<String>,
    time_limit: Option<f64>,
    seed: Option<u64>,
    tolerance: Option<f64>,
) -> Result<(), Box<dyn Error>> {
    if let Some(limit) = time_limit {
        config.time_limit_seconds = Some(limit);
    }
    if let Some(tolerance) = tolerance {
        config.tolerance = tolerance;
    }
    if seed.is_some() {
        config.seed = seed;
    }
    match (engine, optimizer) {
        (_, Some(program)) => {
            config.engine = EngineConfig::External(ExternalCommand::new(program, optimizer_args))
        }
        (Some(EngineKind::Microlp), None) => config.engine = EngineConfig::Microlp,
        (Some(EngineKind::Gurobi), None) => config.engine = EngineConfig::Gurobi,
        (Some(EngineKind::External), None) => {
            if !matches!(config.engine, EngineConfig::External(_)) {
                let message = "the external engine needs --optimizer or a configured program";
                return Err(message.into());
            }
        }
        (None, None) => (),
    }
    config.validate()?;

    let (sets, parameters) = pipeline::load(read_problem(instance)?, config.seed)?;
    let engine = config.build_engine()?;
    let report = Pipeline::from_config(sets, parameters, engine, &config).run()?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn validate(
    instance: &Path,
    seed: Option<u64>,
    options: &ModelOptions,
) -> Result<(), Box<dyn Error>> {
    let (sets, parameters) = pipeline::load(read_problem(instance)?, seed)?;
    for (name, size) in sets.sizes() {
        println!("{:<16}{}", name, size);
    }

    let mut engine = MicrolpEngine::new();
    let model = CmsModel::build(&mut engine, &sets, &parameters, options)?;
    let stats = engine.stats();
    println!();
    for family in model.variables.families() {
        println!("{:<16}{} variables", family.name, family.vars.len());
    }
    println!("variables       {}", stats.variables);
    println!("constraints     {}", stats.constraints);
    println!("nonzeros        {}", stats.nonzeros);
    Ok(())
}

fn demand(instance: &Path, seed: Option<u64>, mean_only: bool) -> Result<(), Box<dyn Error>> {
    let problem = read_problem(instance)?;
    let params = problem
        .demand_params
        .as_ref()
        .ok_or(DataInconsistency::MissingDemand)?;

    let table: DemandTable = if mean_only {
        expected(params, &problem.products, &problem.periods)?
    } else {
        let mut generator = match seed {
            Some(seed) => DemandGenerator::seeded(seed),
            None => DemandGenerator::from_entropy(),
        };
        generator.generate(params, &problem.products, &problem.periods)?
    };

    println!("product  period  demand");
    for ((p, t), d) in &table {
        println!("{:<9}{:<8}{}", p, t, d);
    }
    Ok(())
}

fn parse_results(path: &Path, json: bool, tolerance: f64) -> Result<(), Box<dyn Error>> {
    let text = fs::read_to_string(path).map_err(ExternalEngineFailure::from)?;
    let results = external::parse(&text)?;
    let report = Reporter::new(tolerance).results(&results);

    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn run(args: CommandLine) -> Result<(), Box<dyn Error>> {
    let config = read_config(&args.config)?;
    match args.command {
        Commands::Solve {
            instance,
            json,
            engine,
            optimizer,
            optimizer_args,
            time_limit,
            seed,
            tolerance,
        } => solve(
            config,
            &instance,
            json,
            engine,
            optimizer,
            optimizer_args,
            time_limit,
            seed,
            tolerance,
        ),
        Commands::Validate { instance, seed } => {
            validate(&instance, seed.or(config.seed), &config.model)
        }
        Commands::Demand {
            instance,
            seed,
            expected,
        } => demand(&instance, seed.or(config.seed), expected),
        Commands::ParseResults { results, json } => {
            parse_results(&results, json, config.tolerance)
        }
    }
}

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandLine::parse();
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
