use std::{io, path::PathBuf, process::exit, time::Duration};

use anyhow::{format_err, Context};
use clap::Parser;
use ged_geocode::{
    address_book::DEFAULT_FUZZY_THRESHOLD,
    errors::display_causes_and_backtrace,
    geocoders::{
        nominatim::{Nominatim, DEFAULT_NOMINATIM_URL, DEFAULT_USER_AGENT},
        shared_http_client, GeocodeProvider, Offline,
    },
    FuzzyAddressBook, GeoConfig, Geocode, GeocodeConfig, MergeStrategy, Result, RetryPolicy,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Our command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "ged-geocode",
    version,
    about = "Geocode genealogy place names passed as CSV on standard input"
)]
struct Opt {
    /// The input column containing place names.
    #[arg(long, default_value = "place")]
    place_column: String,

    /// A CSV cache of geocoding results. Read at startup and rewritten when
    /// we're done.
    #[arg(long, default_value = "geo_cache.csv")]
    cache_file: PathBuf,

    /// A CSV file of alternate names for places, with `address` and
    /// `alt_addr` columns, and optionally coordinates and countries.
    #[arg(long)]
    alt_addr_file: Option<PathBuf>,

    /// A JSON file with the default country, country substitutions,
    /// additional countries and continent overrides.
    #[arg(long)]
    geo_config: Option<PathBuf>,

    /// The country to assume for places which don't name one, or `none`.
    #[arg(long)]
    default_country: Option<String>,

    /// Ignore cached results (but still update the cache).
    #[arg(long)]
    always_geocode: bool,

    /// Only use cached results. Never make network requests.
    #[arg(long, conflicts_with = "always_geocode")]
    cache_only: bool,

    /// Minimum seconds between requests to the geocoding service.
    #[arg(long, default_value_t = 1.0)]
    sleep_interval: f64,

    /// Seconds to wait for each geocoding request.
    #[arg(long, default_value_t = 10.0)]
    request_timeout: f64,

    /// How many times to try each request before giving up.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// How repeated places update what we know: `overwrite` or
    /// `fill-missing`.
    #[arg(long = "merge", default_value = "overwrite")]
    merge_strategy: MergeStrategy,

    /// Minimum similarity (0-100) for two place names to be treated as the
    /// same place.
    #[arg(long, default_value_t = DEFAULT_FUZZY_THRESHOLD)]
    fuzzy_threshold: f64,

    /// The Nominatim-compatible search endpoint to use.
    #[arg(long, default_value = DEFAULT_NOMINATIM_URL)]
    nominatim_url: String,

    /// The `User-Agent` to send. Public Nominatim servers require one which
    /// identifies your application.
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    if let Err(err) = recorder.install() {
        warn!("could not install metrics recorder: {}", err);
    }

    let opt = Opt::parse();
    let result = run(opt).await;
    log_metrics(&snapshotter);
    if let Err(err) = result {
        display_causes_and_backtrace(&err);
        exit(1);
    }
}

/// Our main entry point.
async fn run(opt: Opt) -> Result<()> {
    let seconds = |name: &str, value: f64| {
        Duration::try_from_secs_f64(value).with_context(|| format_err!("invalid --{}", name))
    };
    let config = GeocodeConfig {
        cache_file: Some(opt.cache_file),
        alt_addr_file: opt.alt_addr_file,
        always_geocode: opt.always_geocode,
        cache_only: opt.cache_only,
        default_country: opt.default_country,
        geo: GeoConfig::load_or_default(opt.geo_config.as_deref()),
        sleep_interval: seconds("sleep-interval", opt.sleep_interval)?,
        request_timeout: seconds("request-timeout", opt.request_timeout)?,
        retry: RetryPolicy {
            max_retries: opt.max_retries,
            ..RetryPolicy::default()
        },
        merge_strategy: opt.merge_strategy,
        ..GeocodeConfig::default()
    };

    let provider: Box<dyn GeocodeProvider> = if config.cache_only {
        Box::new(Offline)
    } else {
        Box::new(Nominatim::new(
            shared_http_client(),
            &opt.nominatim_url,
            &opt.user_agent,
        )?)
    };

    // Collect every place mentioned in our input.
    let mut address_book = FuzzyAddressBook::with_options(opt.fuzzy_threshold, opt.merge_strategy);
    let mut rdr = csv::Reader::from_reader(io::stdin());
    let place_idx = rdr
        .headers()
        .context("could not read input headers")?
        .iter()
        .position(|h| h == opt.place_column)
        .ok_or_else(|| format_err!("input has no {:?} column", opt.place_column))?;
    for record in rdr.records() {
        let record = record.context("could not read input")?;
        let place = record.get(place_idx).unwrap_or_default().trim();
        if !place.is_empty() {
            address_book.add_address(place, None);
        }
    }
    info!("found {} distinct places", address_book.len());

    // Resolve cached places first, then the rest.
    let mut geocode = Geocode::new(config, provider);
    let (cached, non_cached) = geocode.separate_cached_locations(&address_book);
    info!(
        "{} places are cached, {} need geocoding",
        cached.len(),
        non_cached.len()
    );
    let mut resolved = 0;
    for place in cached
        .get_address_list()
        .iter()
        .chain(non_cached.get_address_list())
    {
        if let Some(location) = geocode.lookup_location(place).await {
            address_book.fuzzy_add_address(place, Some(location));
            resolved += 1;
        }
    }
    info!("resolved {} of {} places", resolved, cached.len() + non_cached.len());

    geocode
        .save_geo_cache()
        .context("could not save geocoding cache")?;

    // Write a summary of every place we saw.
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(io::stdout());
    wtr.write_record(address_book.summary_columns())?;
    for place in address_book.get_address_list() {
        if let Some(row) = address_book.get_summary_row(place) {
            wtr.serialize(row)?;
        }
    }
    wtr.flush().context("error writing output")?;
    Ok(())
}

/// Log every counter we recorded.
fn log_metrics(snapshotter: &Snapshotter) {
    for (key, _unit, _description, value) in snapshotter.snapshot().into_vec() {
        if let DebugValue::Counter(count) = value {
            let labels = key
                .key()
                .labels()
                .map(|label| format!("{}={}", label.key(), label.value()))
                .collect::<Vec<_>>();
            info!("{} {:?} {}", key.key().name(), labels, count);
        }
    }
}
