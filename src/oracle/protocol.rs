//! Wire messages for both oracle backends.
//!
//! Local workers speak lowercase-tagged request/response pairs, one in flight per channel.
//! The remote process speaks capitalized messages over a single WebSocket.

use serde::{Deserialize, Serialize};

use crate::rule::RuleExpr;
use crate::types::{Artifact, GameDesc, MatchResult};

/// Input of a `find` request: configuration with the first seed, plus the rule to keep warm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindInput {
    pub game: GameDesc,
    pub rule: RuleExpr,
}

/// Request sent to one local worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "input", rename_all = "lowercase")]
pub enum WorkerRequest {
    Generate(GameDesc),
    Find(FindInput),
    /// Evaluate the next seed with the game and rule of the last `find`.
    Next(u32),
}

impl WorkerRequest {
    /// Seed this request is about.
    pub fn seed(&self) -> u32 {
        match self {
            WorkerRequest::Generate(game) => game.seed,
            WorkerRequest::Find(input) => input.game.seed,
            WorkerRequest::Next(seed) => *seed,
        }
    }
}

/// Response from one local worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    Generate { data: Artifact },
    Find { data: MatchResult },
    /// Worker-side failure for the current request.
    Error { message: String },
}

/// Client → remote process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RemoteRequest {
    Generate {
        game: GameDesc,
    },
    Find {
        game: GameDesc,
        range: (u32, u32),
        rule: RuleExpr,
        concurrency: usize,
        autosave: f64,
    },
    Stop,
}

/// Remote process → client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RemoteEvent {
    /// One matching seed.
    Result {
        seed: u32,
        #[serde(default)]
        indexes: Vec<u32>,
    },
    /// Fully-scanned frontier of the remote run.
    Progress { end: u32 },
    /// The remote run finished; `end` is its final frontier when it reports one.
    Done {
        #[serde(default)]
        end: Option<u32>,
    },
    /// Answer to `Generate`.
    Galaxy { galaxy: Artifact },
}
