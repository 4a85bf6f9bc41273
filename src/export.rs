//! Export: regenerate already-found seeds and write one CSV row per star of interest.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;

use crate::oracle::LocalOracle;
use crate::pipeline::{Aggregator, StopHandle};
use crate::types::{Artifact, ExportJob, GameDesc};

/// Columns written before the star fields.
const LEADING_COLUMNS: [&str; 3] = ["seed", "index", "matched"];

#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub game: GameDesc,
    /// Write every star of each artifact instead of only the indexes of interest.
    pub all_stars: bool,
    pub concurrency: usize,
}

/// Stars of one artifact to write, with the matched flag, in artifact order.
fn selected_stars<'a>(
    artifact: &'a Artifact,
    job: &ExportJob,
    all_stars: bool,
) -> Result<Vec<(u32, bool, &'a serde_json::Map<String, Value>)>> {
    let stars = artifact
        .get("stars")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("artifact for seed {} has no stars array", job.seed))?;
    let mut out = Vec::new();
    for (pos, star) in stars.iter().enumerate() {
        let Some(fields) = star.as_object() else {
            bail!("seed {}: star {} is not an object", job.seed, pos);
        };
        let index = fields
            .get("index")
            .and_then(Value::as_u64)
            .map_or(pos as u32, |i| i as u32);
        let matched = job.indexes.contains(&index);
        if all_stars || matched {
            out.push((index, matched, fields));
        }
    }
    Ok(out)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Writes artifacts as CSV, one row per selected star, jobs in list order.
///
/// Header: `seed,index,matched` then the union of star field names (sorted). `index` is
/// 1-based in the output.
pub struct CsvAggregator<W: Write> {
    writer: W,
    all_stars: bool,
}

impl<W: Write> CsvAggregator<W> {
    pub fn new(writer: W, all_stars: bool) -> Self {
        Self { writer, all_stars }
    }
}

impl<W: Write> Aggregator for CsvAggregator<W> {
    /// Rows written and the writer back.
    type Output = (usize, W);

    fn aggregate(
        self,
        jobs: &[ExportJob],
        artifacts: HashMap<u32, Artifact>,
    ) -> Result<Self::Output> {
        let mut selected = Vec::with_capacity(jobs.len());
        for job in jobs {
            let artifact = artifacts
                .get(&job.seed)
                .ok_or_else(|| anyhow!("no artifact generated for seed {}", job.seed))?;
            selected.push((job.seed, selected_stars(artifact, job, self.all_stars)?));
        }

        let fields: Vec<String> = selected
            .iter()
            .flat_map(|(_, stars)| stars.iter().flat_map(|(_, _, f)| f.keys()))
            .filter(|k| k.as_str() != "index")
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();

        let rows: Vec<Vec<String>> = selected
            .par_iter()
            .flat_map_iter(|(seed, stars)| {
                stars.iter().map(|(index, matched, star)| {
                    let mut row = Vec::with_capacity(LEADING_COLUMNS.len() + fields.len());
                    row.push(seed.to_string());
                    row.push((index + 1).to_string());
                    row.push(matched.to_string());
                    row.extend(fields.iter().map(|f| cell(star.get(f))));
                    row
                })
            })
            .collect();
        drop(selected);
        drop(artifacts);
        debug!("formatted {} row(s) with {} field(s)", rows.len(), fields.len());

        let mut csv = csv::Writer::from_writer(self.writer);
        csv.write_record(LEADING_COLUMNS.iter().copied().chain(fields.iter().map(String::as_str)))
            .context("write CSV header")?;
        for row in &rows {
            csv.write_record(row).context("write CSV row")?;
        }
        let writer = csv
            .into_inner()
            .map_err(|e| anyhow!("flush CSV output: {}", e.error()))?;
        Ok((rows.len(), writer))
    }
}

/// Generate every job with `oracle` and write the CSV to `writer`. Returns the row count, or
/// `None` when stopped first (nothing is written then).
pub fn run_export<W, P>(
    oracle: &LocalOracle,
    jobs: Vec<ExportJob>,
    options: &ExportOptions,
    stop: &StopHandle,
    writer: W,
    on_progress: P,
) -> Result<Option<usize>>
where
    W: Write,
    P: FnMut(usize, usize),
{
    if jobs.is_empty() {
        bail!("nothing to export");
    }
    let total = jobs.len();
    let aggregator = CsvAggregator::new(writer, options.all_stars);
    let out = oracle.export(
        jobs,
        &options.game,
        options.all_stars,
        options.concurrency,
        stop,
        aggregator,
        on_progress,
    )?;
    Ok(out.map(|(rows, _writer)| {
        info!("Exported {} row(s) from {} seed(s)", rows, total);
        rows
    }))
}
