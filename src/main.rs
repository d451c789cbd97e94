use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use reclaim::workload::{self, Scenario, StressOptions};
use reclaim::{Runtime, RuntimeConfig, StatsFormat};

// Wrapper types for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum StatsFormatArg {
    #[default]
    Human,
    Json,
}

impl From<StatsFormatArg> for StatsFormat {
    fn from(arg: StatsFormatArg) -> Self {
        match arg {
            StatsFormatArg::Human => StatsFormat::Human,
            StatsFormatArg::Json => StatsFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScenarioArg {
    Cycle,
    HoldRef,
    FinalizerOrder,
    InternShrink,
}

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Cycle => Scenario::Cycle,
            ScenarioArg::HoldRef => Scenario::HoldRef,
            ScenarioArg::FinalizerOrder => Scenario::FinalizerOrder,
            ScenarioArg::InternShrink => Scenario::InternShrink,
        }
    }
}

#[derive(Parser)]
#[command(name = "reclaim")]
#[command(about = "Mark-and-sweep heap workbench", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic allocation workload and report collector behavior
    Stress {
        /// Runtime configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of allocation rounds
        #[arg(long, default_value = "10")]
        rounds: usize,

        /// Tables allocated per round
        #[arg(long, default_value = "200")]
        tables: usize,

        /// Strings interned per round
        #[arg(long, default_value = "200")]
        strings: usize,

        /// Userdata created per round
        #[arg(long, default_value = "50")]
        userdata: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Print GC statistics
        #[arg(long)]
        gc_stats: bool,

        /// Statistics format (human or json)
        #[arg(long, value_enum)]
        stats_format: Option<StatsFormatArg>,
    },
    /// Run a built-in collector scenario and print what it observed
    Scenario {
        #[arg(value_enum)]
        name: ScenarioArg,

        /// Runtime configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the resolved runtime configuration as TOML
    Config {
        /// Runtime configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig, String> {
    match path {
        Some(p) => RuntimeConfig::load(p).map_err(String::from),
        None => Ok(RuntimeConfig::default()),
    }
}

fn run_stress(config: RuntimeConfig, opts: &StressOptions) -> Result<(), String> {
    let mut rt = Runtime::with_config(config.clone())?;
    let report = workload::run_stress(&mut rt, opts)?;

    match config.stats_format {
        StatsFormat::Human => {
            println!(
                "rounds: {}, allocated: {} tables / {} strings / {} userdata",
                report.rounds,
                report.allocated.tables,
                report.allocated.strings,
                report.allocated.userdata
            );
            println!(
                "live: {} tables / {} strings / {} userdata / {} closures, {} blocks",
                report.live.tables,
                report.live.strings,
                report.live.userdata,
                report.live.closures,
                report.blocks
            );
            println!(
                "finalized: {}, refs: {} locked / {} held ({} collected)",
                report.finalized, report.locked_refs, report.held_refs, report.held_collected
            );
            if config.gc_stats {
                eprintln!("{}", report.gc);
            }
        }
        StatsFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| format!("failed to serialize report: {}", e))?;
            println!("{}", json);
        }
    }

    rt.close()?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Stress {
            config,
            rounds,
            tables,
            strings,
            userdata,
            seed,
            gc_stats,
            stats_format,
        } => {
            let mut runtime_config = match load_config(config.as_ref()) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            runtime_config.gc_stats |= gc_stats;
            if let Some(format) = stats_format {
                runtime_config.stats_format = format.into();
            }
            let opts = StressOptions {
                rounds,
                tables,
                strings,
                userdata,
                seed,
            };
            if let Err(e) = run_stress(runtime_config, &opts) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Scenario { name, config } => {
            let runtime_config = match load_config(config.as_ref()) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let scenario: Scenario = name.into();
            match scenario.run(&runtime_config) {
                Ok(lines) => {
                    println!("{}:", scenario.name());
                    for line in lines {
                        println!("  {}", line);
                    }
                }
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Commands::Config { config } => {
            let rendered = load_config(config.as_ref())
                .and_then(|c| c.to_toml().map_err(String::from));
            match rendered {
                Ok(toml) => print!("{}", toml),
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}
