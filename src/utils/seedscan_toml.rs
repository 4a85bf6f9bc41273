//! Load `.seedscan.toml` from the working directory (CLI only). The library takes its settings
//! as arguments; the CLI merges file, environment and flags into [`Opts`].

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::types::Opts;
use crate::utils::config::PackagePaths;

#[derive(Debug, Deserialize)]
pub(crate) struct SeedscanToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    db_path: Option<String>,
    concurrency: Option<usize>,
    autosave: Option<f64>,
    star_count: Option<u32>,
    resource_multiplier: Option<f32>,
    remote: Option<String>,
    worker: Option<Vec<String>>,
    all_stars: Option<bool>,
    verbose: Option<bool>,
}

/// Load the config file from `dir` if present. Returns None if missing or unreadable.
pub(crate) fn load_seedscan_toml(dir: &Path) -> Option<SeedscanToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($section:expr, $opts:expr, $field:ident) => {
        if let Some(v) = $section.$field.clone() {
            $opts.$field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI flags.
pub(crate) fn apply_file_to_opts(file: &SeedscanToml, opts: &mut Opts) {
    let s = &file.settings;
    if let Some(ref p) = s.db_path {
        opts.db_path = Some(PathBuf::from(p));
    }
    apply_file_opt!(s, opts, concurrency);
    apply_file_opt!(s, opts, autosave);
    apply_file_opt!(s, opts, star_count);
    apply_file_opt!(s, opts, resource_multiplier);
    apply_file_opt!(s, opts, all_stars);
    apply_file_opt!(s, opts, verbose);
    if let Some(ref r) = s.remote {
        opts.remote = Some(r.clone());
    }
    if let Some(ref w) = s.worker {
        opts.worker = w.clone();
    }
}
