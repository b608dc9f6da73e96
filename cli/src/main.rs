use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use dotenvy::dotenv;

use labelwatch_backend::change_summary::ChangeSummaryBuilder;
use labelwatch_backend::config::WatchConfig;
use labelwatch_backend::dailymed::DailyMedClient;
use labelwatch_backend::filters::{apply_filters, filter_by_watchlist, FilterCriteria};
use labelwatch_backend::logger::init_logger;
use labelwatch_backend::openfda::OpenFdaClient;

#[derive(Parser, Debug)]
#[command(author, version, about = "Track changes to drug label sections via DailyMed, cross-checked against openFDA", long_about = None)]
struct Cli {
    /// Optional path to a JSON config file (watchlist, tracked sections, endpoints).
    #[arg(long, env = "LABELWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Keep only updates dated on or after this date (YYYY-MM-DD).
    #[arg(long)]
    date_start: Option<NaiveDate>,

    /// Keep only updates dated on or before this date (YYYY-MM-DD).
    #[arg(long)]
    date_end: Option<NaiveDate>,

    /// Keep only updates whose setid belongs to this DailyMed drug class code.
    #[arg(long)]
    class_code: Option<String>,

    /// List the available DailyMed drug classes and exit.
    #[arg(long)]
    list_classes: bool,

    /// Keep only updates whose title contains this keyword.
    #[arg(long)]
    keyword: Option<String>,

    /// Keep only updates whose title contains this manufacturer name.
    #[arg(long)]
    manufacturer: Option<String>,

    /// Match all feed updates instead of only the configured watchlist.
    #[arg(long)]
    all_drugs: bool,

    /// Skip the openFDA cross-validation step.
    #[arg(long)]
    no_fda: bool,

    /// Process at most this many matched updates.
    #[arg(long)]
    limit: Option<usize>,
}

fn load_config(cli: &Cli) -> Result<WatchConfig> {
    match &cli.config {
        Some(path) => WatchConfig::load_from_json(path),
        None => Ok(WatchConfig::default()),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let dailymed = DailyMedClient::with_config(&config);

    if cli.list_classes {
        for class in dailymed.fetch_drug_classes() {
            println!("{}  {} ({})", class.code, class.name, class.class_type);
        }
        return Ok(());
    }

    let updates = dailymed.fetch_rss_updates()?;
    println!("Feed updates: {}", updates.len());

    let mut matches = if cli.all_drugs {
        updates
    } else {
        filter_by_watchlist(updates, &config.watchlist)
    };
    if let Some(limit) = cli.limit {
        matches.truncate(limit);
    }
    println!("Matched updates: {}", matches.len());

    let builder = ChangeSummaryBuilder::new(&dailymed, &config.sections);
    let summaries: Vec<String> = matches
        .iter()
        .map(|u| builder.build(&u.setid, u.version))
        .collect();

    let class_setids = cli.class_code.as_deref().map(|code| {
        dailymed.fetch_spl_setids_for_drug_class(code, None)
    });

    let criteria = FilterCriteria {
        date_start: cli.date_start,
        date_end: cli.date_end,
        class_setids,
        keyword: cli.keyword.clone(),
        manufacturer: cli.manufacturer.clone(),
    };
    let (matches, summaries) = apply_filters(matches, Some(summaries), &criteria)?;
    let summaries = summaries.unwrap_or_default();

    let validations = if cli.no_fda {
        None
    } else {
        Some(OpenFdaClient::new().validate_updates(&matches))
    };

    for (i, update) in matches.iter().enumerate() {
        println!();
        println!("=== {} ===", update.title);
        println!("Link: {}", update.link);
        println!("Setid: {} (version {})", update.setid, update.version);
        if !update.updated_date.is_empty() {
            println!("Updated: {}", update.updated_date);
        } else if !update.pub_date.is_empty() {
            println!("Published: {}", update.pub_date);
        }
        if let Some(validations) = &validations {
            let (msg, lag) = &validations[i];
            match lag {
                Some(days) => println!("{} (lag: {} day(s))", msg, days),
                None => println!("{}", msg),
            }
        }
        println!("Changes:");
        for line in summaries[i].lines() {
            println!("  {}", line);
        }
    }

    Ok(())
}

fn main() {
    dotenv().ok();
    init_logger();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}
