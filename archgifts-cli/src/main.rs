use clap::Parser;
use log::LevelFilter;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use archgifts_core::config::{KEY_ADD_GIFTS, KEY_APPLY_BUGFIXES, KEY_GIFT_FRAG_AMOUNT, KEY_GIFT_LIST};
use archgifts_core::rules::FRAGMENT_UTILITIES;
use archgifts_core::{
    HostSnapshot, LifecycleCoordinator, LifecycleSummary, LogSink, Settings,
    SimulatedHost,
};

const PROPERTIES_FILE: &str = "archaeologygifts.properties";

#[derive(Debug, Parser)]
#[command(
    name = "archgifts",
    version,
    about = "Apply archaeology gifts and bug fixes to a simulated game server"
)]
struct Args {
    /// Mod properties file. Defaults to the per-user config directory.
    #[arg(long, value_name = "PROPERTIES")]
    config: Option<PathBuf>,

    /// JSON host snapshot (functions, types, item templates). Defaults to a
    /// stock server without templates.
    #[arg(long, value_name = "JSON")]
    host: Option<PathBuf>,

    #[arg(long)]
    apply_bugfixes: Option<bool>,

    #[arg(long)]
    add_gifts: Option<bool>,

    #[arg(long, value_name = "N")]
    gift_frag_amount: Option<String>,

    /// Whitespace-separated item ids or template names.
    #[arg(long, value_name = "ITEMS")]
    gift_list: Option<String>,

    /// Pick this many statues from the spliced gift table after patching.
    #[arg(long, default_value_t = 0)]
    rolls: usize,

    #[arg(long)]
    seed: Option<u64>,

    /// Print the lifecycle summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[arg(short, long, default_value_t = false, conflicts_with = "verbose")]
    quiet: bool,
}

fn setup_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}

fn default_config_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir().or_else(dirs::data_dir)?;
    base.push("ArchGifts");
    base.push(PROPERTIES_FILE);
    Some(base)
}

fn load_settings(args: &Args) -> archgifts_core::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                log::info!("using properties from {}", path.display());
                Settings::load(&path)?
            }
            None => Settings::new(),
        },
    };

    if let Some(v) = args.apply_bugfixes {
        settings.insert(KEY_APPLY_BUGFIXES, v.to_string());
    }
    if let Some(v) = args.add_gifts {
        settings.insert(KEY_ADD_GIFTS, v.to_string());
    }
    if let Some(v) = &args.gift_frag_amount {
        settings.insert(KEY_GIFT_FRAG_AMOUNT, v.clone());
    }
    if let Some(v) = &args.gift_list {
        settings.insert(KEY_GIFT_LIST, v.clone());
    }

    Ok(settings)
}

fn load_host(path: Option<&Path>) -> archgifts_core::Result<SimulatedHost> {
    let snapshot = match path {
        Some(path) => HostSnapshot::load(path)?,
        None => HostSnapshot::stock_server(),
    };
    Ok(SimulatedHost::from_snapshot(snapshot))
}

fn print_summary(summary: &LifecycleSummary) {
    println!("Archaeology Gifts {}", summary.version);

    if let Some(config) = &summary.configuration {
        println!(
            "  bug fixes: {}  gifts: {}  min fragments: {}  gift items: {:?}",
            config.apply_bugfixes(),
            config.inject_gifts(),
            config.gift_fragment_threshold(),
            config.gift_item_ids()
        );
    }
    for warning in &summary.config_warnings {
        println!("  warning: {warning}");
    }

    if let Some(patches) = &summary.patches {
        println!(
            "  pre-init: {}/{} rules applied",
            patches.applied.len(),
            patches.attempted
        );
        for label in &patches.applied {
            println!("    ok    {label}");
        }
        for failure in &patches.failures {
            println!("    FAIL  {failure}");
        }
    }

    if let Some(records) = &summary.records {
        println!(
            "  records: {} updated ({} changed), {} skipped",
            records.updated.len(),
            records.changed(),
            records.failures.len()
        );
        for outcome in &records.updated {
            println!(
                "    {:>6}  droppable={}  fragments={}",
                outcome.id, outcome.droppable, outcome.fragment_requirement
            );
        }
        for failure in &records.failures {
            println!("    FAIL  {failure}");
        }
    }
}

fn roll_samples(host: &SimulatedHost, rolls: usize, seed: u64) {
    let Some(table) = host.gift_table() else {
        println!("No gift table spliced into {FRAGMENT_UTILITIES}, nothing to roll.");
        return;
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picks: BTreeMap<i32, usize> = BTreeMap::new();
    for _ in 0..rolls {
        *picks.entry(table.pick(&mut rng)).or_default() += 1;
    }
    println!("Gift statue rolls (seed {seed}): {picks:?}");
}

fn run(args: Args) -> archgifts_core::Result<()> {
    let settings = load_settings(&args)?;
    let mut host = load_host(args.host.as_deref())?;

    let mut coordinator = LifecycleCoordinator::new(LogSink);
    coordinator.configure(&settings, &host)?;
    coordinator.pre_init(&mut host)?;
    coordinator.on_records_ready(&mut host)?;

    let summary = coordinator.summary();
    if args.json {
        let text = serde_json::to_string_pretty(&summary)?;
        println!("{text}");
    } else {
        print_summary(&summary);
    }

    if args.rolls > 0 {
        let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen::<u64>());
        roll_samples(&host, args.rolls, seed);
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    let level = if args.quiet {
        LevelFilter::Error
    } else if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(err) = setup_logging(level) {
        eprintln!("Failed to initialise logging: {err}");
    }

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
