use anyhow::{bail, Context};
use cb_engine::{ActivityDef, EngineConfig, ScenarioController, Workload};
use cb_virtdata::{BindingCompiler, GeneratorLibrary, Kind};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;

fn cli() -> Command {
    Command::new("cyclebench")
        .version(cb_engine::VERSION)
        .about("Deterministic, cycle-driven load generation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter used when RUST_LOG is not set"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Write logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Run one activity to completion")
                .arg(
                    Arg::new("params")
                        .required(true)
                        .num_args(1..)
                        .help("Activity parameters, e.g. alias=a driver=diag cycles=1M threads=4"),
                )
                .arg(
                    Arg::new("workload")
                        .long("workload")
                        .value_parser(value_parser!(PathBuf))
                        .help("Workload YAML file"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine configuration TOML file"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to wait before force-stopping"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the summary as JSON"),
                ),
        )
        .subcommand(
            Command::new("recipe")
                .about("Print the values of a binding recipe")
                .arg(Arg::new("recipe").required(true).help("Recipe, e.g. 'Hash(); Mod(100)'"))
                .arg(
                    Arg::new("cycles")
                        .long("cycles")
                        .default_value("10")
                        .value_parser(value_parser!(i64))
                        .help("Number of cycles to print, starting at 0"),
                )
                .arg(
                    Arg::new("start")
                        .long("start")
                        .default_value("0")
                        .value_parser(value_parser!(i64))
                        .help("First cycle"),
                ),
        )
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    init_tracing(level, matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("run", args)) => run(args),
        Some(("recipe", args)) => recipe(args),
        _ => bail!("unknown command"),
    }
}

fn run(args: &ArgMatches) -> anyhow::Result<()> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let params: Vec<String> = args
        .get_many::<String>("params")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let def = ActivityDef::parse(&params.join(";")).context("parsing activity parameters")?;

    let controller = ScenarioController::new(config);
    if let Some(path) = args.get_one::<PathBuf>("workload") {
        let workload =
            Workload::from_file(path).with_context(|| format!("loading workload {}", path.display()))?;
        if def.workload().is_none() {
            def.params().set("workload", workload.name());
        }
        controller.loader().register_workload(workload);
    }

    let alias = def.alias();
    let timeout = args.get_one::<u64>("timeout").map(|s| Duration::from_secs(*s));
    let started = controller.start(def).with_context(|| format!("starting activity {alias}"))?;
    let completed = started.await_completion(timeout);
    if !matches!(completed, Ok(true)) {
        controller.force_stop_scenario(controller.config().force_stop_grace());
    }

    let summary = started.metrics().summary();
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    controller.shutdown();

    match completed {
        Ok(true) => Ok(()),
        Ok(false) => bail!("activity {alias} did not complete before the timeout"),
        Err(err) => Err(anyhow::Error::new(err).context(format!("activity {alias} failed"))),
    }
}

fn recipe(args: &ArgMatches) -> anyhow::Result<()> {
    let Some(text) = args.get_one::<String>("recipe") else {
        bail!("a recipe is required");
    };
    let cycles = args.get_one::<i64>("cycles").copied().unwrap_or(10);
    let start = args.get_one::<i64>("start").copied().unwrap_or(0);

    let compiler = BindingCompiler::new(GeneratorLibrary::with_defaults());
    let binding = compiler
        .compile(text, Kind::Value)
        .with_context(|| format!("compiling recipe '{text}'"))?;
    for cycle in start..start.saturating_add(cycles) {
        let value = binding
            .apply(cycle)
            .with_context(|| format!("evaluating cycle {cycle}"))?;
        println!("{cycle}\t{value}");
    }
    Ok(())
}
