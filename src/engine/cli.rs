//! CLI command handlers: merge settings, open the profile DB, run the subcommand.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::engine::arg_parser::{
    Cli, CommonArgs, Commands, ExportArgs, GenerateArgs, ProfileCommand, ResultsArgs, SearchArgs,
};
use crate::engine::db_ops::ProfileStore;
use crate::engine::progress::{
    ProgressBar, ProgressBarConfig, create_progress_bar, finish_bar, set_progress, write_above,
};
use crate::export::{ExportOptions, run_export};
use crate::oracle::{LocalOracle, Oracle, RemoteOracle};
use crate::pipeline::StopHandle;
use crate::rule::RuleExpr;
use crate::search::{CheckpointStore, SearchObserver, run_search};
use crate::types::{Checkpoint, MatchResult, Opts, Termination};
use crate::utils::config::{PackagePaths, ProductLimits};
use crate::utils::seedscan_toml::{apply_file_to_opts, load_seedscan_toml};
use crate::utils::{Colors, env_db_path, env_remote, setup_logging};

fn setup_opts(cli: &Cli) -> Opts {
    let cwd = Path::new(".");
    let mut opts = Opts::default();
    if let Some(file) = load_seedscan_toml(cwd) {
        apply_file_to_opts(&file, &mut opts);
    }
    if let Some(db) = env_db_path(cwd) {
        opts.db_path = Some(db);
    }
    if let Some(remote) = env_remote(cwd) {
        opts.remote = Some(remote);
    }

    let c = &cli.common;
    if let Some(ref db) = c.db {
        opts.db_path = Some(db.clone());
    }
    if let Some(n) = c.concurrency {
        opts.concurrency = n;
    }
    if let Some(secs) = c.autosave {
        opts.autosave = secs;
    }
    if let Some(n) = c.star_count {
        opts.star_count = n;
    }
    if let Some(m) = c.resource_multiplier {
        opts.resource_multiplier = m;
    }
    if let Some(ref r) = c.remote {
        opts.remote = Some(r.clone());
    }
    if let Some(ref w) = c.worker {
        opts.worker = w.split_whitespace().map(str::to_string).collect();
    }
    if let Some(v) = c.verbose {
        opts.verbose = v;
    }
    if let Commands::Export(ExportArgs {
        all_stars: Some(all),
        ..
    }) = cli.command
    {
        opts.all_stars = all;
    }

    setup_logging(opts.verbose);
    opts
}

fn db_path(opts: &Opts) -> PathBuf {
    opts.db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(PackagePaths::get().db_filename()))
}

fn local_oracle(opts: &Opts) -> Option<LocalOracle> {
    let (program, args) = opts.worker.split_first()?;
    Some(LocalOracle::with_command(program.clone(), args.to_vec()))
}

/// Remote when configured, else the local worker pool.
fn search_oracle(opts: &Opts) -> Result<Box<dyn Oracle>> {
    if let Some(ref addr) = opts.remote {
        return Ok(Box::new(RemoteOracle::new(addr)?));
    }
    match local_oracle(opts) {
        Some(local) => Ok(Box::new(local)),
        None => bail!("no generator configured: pass --remote ADDR or --worker CMD (or set them in .seedscan.toml)"),
    }
}

fn export_oracle(opts: &Opts) -> Result<LocalOracle> {
    if let Some(ref addr) = opts.remote {
        return Ok(RemoteOracle::new(addr)?.exporter());
    }
    local_oracle(opts).ok_or_else(|| {
        anyhow!("no generator configured: pass --remote ADDR or --worker CMD (or set them in .seedscan.toml)")
    })
}

/// `--rule` value: inline JSON, or `@path` to a JSON file.
fn parse_rule(arg: &str) -> Result<RuleExpr> {
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("read rule file {}", path))?
        }
        None => arg.to_string(),
    };
    let value: serde_json::Value = serde_json::from_str(&text).context("parse rule JSON")?;
    RuleExpr::try_from(value)
}

/// Checkpoint request for a run: explicit flags win, then the stored checkpoint, then settings.
fn search_request(
    id: &str,
    stored: Option<&Checkpoint>,
    args: &SearchArgs,
    common: &CommonArgs,
    opts: &Opts,
) -> Result<Checkpoint> {
    let rule = match (&args.rule, stored) {
        (Some(r), _) => parse_rule(r)?,
        (None, Some(cp)) => cp.rule.clone(),
        (None, None) => bail!("--rule is required for a profile without a stored search"),
    };
    let start = args
        .start
        .or(stored.map(|cp| cp.start))
        .ok_or_else(|| anyhow!("--start is required for a profile without a stored search"))?;
    let end = args
        .end
        .or(stored.map(|cp| cp.end))
        .ok_or_else(|| anyhow!("--end is required for a profile without a stored search"))?;
    Ok(Checkpoint {
        id: id.to_string(),
        start,
        end,
        current: start,
        found: 0,
        concurrency: common
            .concurrency
            .or(stored.map(|cp| cp.concurrency))
            .unwrap_or(opts.concurrency),
        autosave: common
            .autosave
            .or(stored.map(|cp| cp.autosave))
            .unwrap_or(opts.autosave),
        star_count: common
            .star_count
            .or(stored.map(|cp| cp.star_count))
            .unwrap_or(opts.star_count),
        resource_multiplier: common
            .resource_multiplier
            .or(stored.map(|cp| cp.resource_multiplier))
            .unwrap_or(opts.resource_multiplier),
        rule,
    })
}

/// Progress bar over the seed range plus a line per match.
struct CliObserver {
    bar: ProgressBar,
    start: u32,
    matches: u64,
}

impl SearchObserver for CliObserver {
    fn on_result(&mut self, result: &MatchResult) {
        self.matches += 1;
        write_above(
            &self.bar,
            format!(
                "{} seed {} stars {:?}",
                Colors::colorize(Colors::MATCH, "Match:"),
                result.seed,
                result.indexes
            ),
        );
    }

    fn on_progress(&mut self, frontier: u32) {
        set_progress(&self.bar, frontier.saturating_sub(self.start) as usize);
    }

    fn on_complete(&mut self) {
        finish_bar(&self.bar);
    }

    fn on_interrupt(&mut self) {
        finish_bar(&self.bar);
    }

    fn on_error(&mut self, cause: &anyhow::Error) {
        write_above(
            &self.bar,
            format!("{} {:#}", Colors::colorize(Colors::FAILED, "Failed:"), cause),
        );
        finish_bar(&self.bar);
    }
}

fn handle_search(opts: &Opts, common: &CommonArgs, args: &SearchArgs) -> Result<()> {
    let mut store = ProfileStore::open(&db_path(opts))?;
    let id = match (&args.profile, &args.name) {
        (Some(id), _) => {
            store
                .get_profile(id)?
                .ok_or_else(|| anyhow!("no profile {}", id))?;
            id.clone()
        }
        (None, Some(name)) => {
            let info = store.create_profile(name)?;
            info!("Created profile {} ({})", info.id, info.name);
            info.id
        }
        (None, None) => bail!("pass --profile ID to resume or --name NAME to start a new search"),
    };
    if args.restart == Some(true) {
        store.clear_profile(&id)?;
        info!("Cleared stored matches of {}", id);
    }

    let stored = store.load(&id)?;
    let request = search_request(&id, stored.as_ref(), args, common, opts)?;
    let oracle = search_oracle(opts)?;

    let stop = StopHandle::new();
    stop.stop_on_ctrlc()?;
    let mut observer = CliObserver {
        bar: create_progress_bar(ProgressBarConfig::new(
            request.range().len() as usize,
            "Scanning",
            " seeds",
        )),
        start: request.start,
        matches: 0,
    };
    if let Some(cp) = stored.as_ref() {
        observer.on_progress(cp.current);
    }

    let outcome = run_search(oracle.as_ref(), &mut store, &request, &stop, &mut observer)?;
    let found = store.load(&id)?.map_or(0, |cp| cp.found);
    match outcome {
        Termination::Completed => info!(
            "{} | {}",
            Colors::colorize(Colors::FRONTIER, &format!("Scanned [{}, {})", request.start, request.end)),
            Colors::colorize(Colors::MATCH, &format!("Seeds found: {}", found))
        ),
        Termination::Interrupted => warn!(
            "{} | {} (resume with --profile {})",
            Colors::colorize(Colors::STOPPED, "Interrupted"),
            Colors::colorize(Colors::MATCH, &format!("Seeds found: {}", found)),
            id
        ),
    }
    debug!("{} new match(es) this run", observer.matches);
    Ok(())
}

fn handle_export(opts: &Opts, args: &ExportArgs) -> Result<()> {
    let mut store = ProfileStore::open(&db_path(opts))?;
    store
        .get_profile(&args.profile)?
        .ok_or_else(|| anyhow!("no profile {}", args.profile))?;
    let start = args.start.unwrap_or(0);
    let end = args.end.unwrap_or(ProductLimits::MAX_SEED);
    if start > end {
        bail!("--start {} is past --end {}", start, end);
    }
    let jobs = store.export_jobs_range(&args.profile, start, end)?;
    if jobs.is_empty() {
        info!("{} has no matches in [{}, {}] to export", args.profile, start, end);
        return Ok(());
    }
    let game = store
        .load(&args.profile)?
        .map_or_else(|| opts.game(), |cp| cp.game());
    let oracle = export_oracle(opts)?;
    let options = ExportOptions {
        game,
        all_stars: opts.all_stars,
        concurrency: opts.concurrency,
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(PackagePaths::get().export_filename()));
    let file = File::create(&output).with_context(|| format!("create {}", output.display()))?;

    let stop = StopHandle::new();
    stop.stop_on_ctrlc()?;
    let bar = create_progress_bar(ProgressBarConfig::new(jobs.len(), "Exporting", " seeds"));
    let result = run_export(
        &oracle,
        jobs,
        &options,
        &stop,
        BufWriter::new(file),
        |done, _total| set_progress(&bar, done),
    );
    finish_bar(&bar);
    match result {
        Ok(Some(rows)) => {
            info!("Wrote {} row(s) to {}", rows, output.display());
            Ok(())
        }
        Ok(None) => {
            warn!("Export stopped; nothing written");
            let _ = std::fs::remove_file(&output);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&output);
            Err(e)
        }
    }
}

fn handle_generate(opts: &Opts, args: &GenerateArgs) -> Result<()> {
    let oracle = search_oracle(opts)?;
    let artifact = oracle.generate(&opts.game().with_seed(args.seed))?;
    let json = serde_json::to_string_pretty(&artifact).context("encode artifact")?;
    match args.output {
        Some(ref path) => {
            std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
            info!("Wrote seed {} to {}", args.seed, path.display());
        }
        None => {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{}", json).context("write stdout")?;
        }
    }
    Ok(())
}

fn handle_profile(opts: &Opts, command: &ProfileCommand) -> Result<()> {
    let mut store = ProfileStore::open(&db_path(opts))?;
    match command {
        ProfileCommand::List => {
            let profiles = store.list_profiles()?;
            if profiles.is_empty() {
                info!("No profiles yet");
            }
            for p in profiles {
                let progress = match store.load(&p.id)? {
                    Some(cp) => format!(
                        "[{}, {}) at {} | {} found",
                        cp.start, cp.end, cp.current, cp.found
                    ),
                    None => "no search yet".to_string(),
                };
                println!("{}  {}  {}", p.id, p.name, progress);
            }
        }
        ProfileCommand::Create { name } => {
            let info = store.create_profile(name)?;
            println!("{}", info.id);
        }
        ProfileCommand::Show { id } => {
            let info = store
                .get_profile(id)?
                .ok_or_else(|| anyhow!("no profile {}", id))?;
            let checkpoint = store.load(id)?;
            let shown = serde_json::json!({ "profile": info, "checkpoint": checkpoint });
            println!(
                "{}",
                serde_json::to_string_pretty(&shown).context("encode profile")?
            );
        }
        ProfileCommand::Clear { id } => match store.clear_profile(id)? {
            true => info!("Cleared {}", id),
            false => bail!("no profile {}", id),
        },
        ProfileCommand::Delete { id } => match store.delete_profile(id)? {
            true => info!("Deleted {}", id),
            false => bail!("no profile {}", id),
        },
    }
    Ok(())
}

fn handle_results(opts: &Opts, args: &ResultsArgs) -> Result<()> {
    let store = ProfileStore::open(&db_path(opts))?;
    let total = store.match_count(&args.profile)?;
    let page = store.results_page(&args.profile, args.offset, args.limit)?;
    let mut out = std::io::stdout().lock();
    for m in &page {
        writeln!(out, "{}\t{}", m.seed, m.index).context("write stdout")?;
    }
    info!(
        "Rows {}..{} of {}",
        args.offset,
        args.offset + page.len(),
        total
    );
    Ok(())
}

/// Run the selected subcommand.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = setup_opts(cli);
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );
    match &cli.command {
        Commands::Search(args) => handle_search(&opts, &cli.common, args),
        Commands::Export(args) => handle_export(&opts, args),
        Commands::Generate(args) => handle_generate(&opts, args),
        Commands::Profile(command) => handle_profile(&opts, command),
        Commands::Results(args) => handle_results(&opts, args),
    }
}
