use anyhow::{Result, bail};
use seedscan::oracle::{
    FindInput, GeneratorWorker, RemoteEvent, RemoteOracle, RemoteRequest, WorkerRequest,
    WorkerResponse,
};
use seedscan::pipeline::{Advance, Aggregator, Frontier, autosave_interval, job_request};
use seedscan::{
    Artifact, Checkpoint, CheckpointStore, CsvAggregator, ExportJob, GameDesc, Generator,
    LocalOracle, MatchResult, OracleWorker, RuleExpr, SearchObserver, SeedRange, StopHandle,
    Termination, run_search, search_with_generator, validate_checkpoint,
};
use serde_json::json;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, WebSocket};

// --- fixtures ---

/// Shared bookkeeping of every generator instance in a run.
#[derive(Default)]
struct Tracker {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    seen: Mutex<Vec<u32>>,
    untils: Mutex<Vec<(u32, Option<u32>)>>,
}

impl Tracker {
    fn seen_sorted(&self) -> Vec<u32> {
        let mut seen = self.seen.lock().unwrap().clone();
        seen.sort_unstable();
        seen
    }
}

/// Matches the configured seeds (star 1), can fail, panic or stop on request.
#[derive(Clone, Default)]
struct FakeGen {
    tracker: Arc<Tracker>,
    matches: HashSet<u32>,
    fail_on: Option<u32>,
    panic_on: Option<u32>,
    stop_after: Option<(usize, StopHandle)>,
    delay: Duration,
}

impl FakeGen {
    fn matching(seeds: &[u32]) -> Self {
        Self {
            matches: seeds.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl Generator for FakeGen {
    fn generate(&mut self, game: &GameDesc) -> Result<Artifact> {
        self.tracker
            .untils
            .lock()
            .unwrap()
            .push((game.seed, game.until));
        let stars: Vec<_> = (0..game.until.unwrap_or(4))
            .map(|i| json!({"index": i, "name": format!("S{}-{}", game.seed, i), "mass": i}))
            .collect();
        Ok(json!({"seed": game.seed, "stars": stars}))
    }

    fn find(&mut self, game: &GameDesc, _rule: &RuleExpr) -> Result<Vec<u32>> {
        let t = &self.tracker;
        let now = t.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        t.peak.fetch_max(now, Ordering::SeqCst);
        let call = t.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, stop)) = &self.stop_after
            && call >= *n
        {
            stop.stop();
        }
        if self.panic_on == Some(game.seed) {
            t.in_flight.fetch_sub(1, Ordering::SeqCst);
            panic!("generator crashed on seed {}", game.seed);
        }
        thread::sleep(self.delay);
        t.seen.lock().unwrap().push(game.seed);
        t.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_on == Some(game.seed) {
            bail!("bad seed {}", game.seed);
        }
        Ok(match self.matches.contains(&game.seed) {
            true => vec![1],
            false => Vec::new(),
        })
    }
}

fn rule() -> RuleExpr {
    RuleExpr::leaf("StarType", json!({"value": 2}))
}

fn request(id: &str, start: u32, end: u32, concurrency: usize) -> Checkpoint {
    Checkpoint {
        id: id.to_string(),
        start,
        end,
        current: start,
        found: 0,
        concurrency,
        autosave: 5.0,
        star_count: 64,
        resource_multiplier: 1.0,
        rule: rule(),
    }
}

/// Keeps `found` as the number of distinct matched seeds, like the SQLite store.
#[derive(Default)]
struct MemStore {
    record: Option<Checkpoint>,
    matches: Vec<MatchResult>,
    saves: usize,
    /// `found` carried by every saved checkpoint, in order.
    claimed: Vec<u64>,
}

impl CheckpointStore for MemStore {
    fn load(&mut self, _id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.record.clone())
    }

    fn save(&mut self, checkpoint: &Checkpoint, new_matches: &[MatchResult]) -> Result<bool> {
        self.saves += 1;
        self.claimed.push(checkpoint.found);
        self.matches.extend_from_slice(new_matches);
        let found = self.matches.iter().map(|m| m.seed).collect::<HashSet<_>>().len() as u64;
        match &mut self.record {
            Some(prev) if checkpoint.current < prev.current => {
                prev.found = found;
                Ok(false)
            }
            _ => {
                self.record = Some(Checkpoint {
                    found,
                    ..checkpoint.clone()
                });
                Ok(true)
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Event {
    Result(u32),
    Progress(u32),
    Complete,
    Interrupt,
    Error,
}

#[derive(Default)]
struct Recorder(Vec<Event>);

impl Recorder {
    fn results(&self) -> Vec<u32> {
        self.0
            .iter()
            .filter_map(|e| match e {
                Event::Result(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn progress(&self) -> Vec<u32> {
        self.0
            .iter()
            .filter_map(|e| match e {
                Event::Progress(f) => Some(*f),
                _ => None,
            })
            .collect()
    }

    fn terminals(&self) -> Vec<&Event> {
        self.0
            .iter()
            .filter(|e| matches!(e, Event::Complete | Event::Interrupt | Event::Error))
            .collect()
    }
}

impl SearchObserver for Recorder {
    fn on_result(&mut self, result: &MatchResult) {
        self.0.push(Event::Result(result.seed));
    }
    fn on_progress(&mut self, frontier: u32) {
        self.0.push(Event::Progress(frontier));
    }
    fn on_complete(&mut self) {
        self.0.push(Event::Complete);
    }
    fn on_interrupt(&mut self) {
        self.0.push(Event::Interrupt);
    }
    fn on_error(&mut self, _cause: &anyhow::Error) {
        self.0.push(Event::Error);
    }
}

fn search(
    generator: FakeGen,
    store: &mut MemStore,
    req: &Checkpoint,
    stop: &StopHandle,
) -> (Result<Termination>, Recorder) {
    let mut observer = Recorder::default();
    let out = search_with_generator(move || generator.clone(), store, req, stop, &mut observer);
    (out, observer)
}

// --- frontier ---

#[test]
fn test_frontier_in_order() {
    let mut f = Frontier::new(SeedRange::new(0, 3));
    assert_eq!(f.advance(0), Advance::Moved(1));
    assert_eq!(f.advance(1), Advance::Moved(2));
    assert_eq!(f.advance(2), Advance::Moved(3));
    assert!(f.is_complete());
}

#[test]
fn test_frontier_out_of_order_waits_for_gap() {
    let mut f = Frontier::new(SeedRange::new(10, 15));
    assert_eq!(f.advance(12), Advance::Pending);
    assert_eq!(f.advance(11), Advance::Pending);
    assert_eq!(f.current(), 10);
    assert_eq!(f.pending_len(), 2);
    assert_eq!(f.advance(10), Advance::Moved(13));
    assert_eq!(f.pending_len(), 0);
}

#[test]
fn test_frontier_duplicates_and_out_of_range_are_ignored() {
    let mut f = Frontier::new(SeedRange::new(0, 5));
    f.advance(0);
    f.advance(3);
    assert_eq!(f.advance(0), Advance::Duplicate);
    assert_eq!(f.advance(3), Advance::Duplicate);
    assert_eq!(f.advance(5), Advance::OutOfRange);
    assert_eq!(f.current(), 1);
}

#[test]
fn test_frontier_monotonic_under_reverse_completion() {
    let mut f = Frontier::new(SeedRange::new(0, 50));
    let mut last = f.current();
    for seed in (0..50).rev() {
        f.advance(seed);
        assert!(f.current() >= last);
        last = f.current();
    }
    assert_eq!(f.current(), 50);
}

#[test]
fn test_autosave_interval_never_zero() {
    assert_eq!(autosave_interval(2.0), Duration::from_secs(2));
    assert!(autosave_interval(0.0) > Duration::ZERO);
    assert!(autosave_interval(f64::NAN) > Duration::ZERO);
}

// --- rules ---

#[test]
fn test_rule_from_groups_collapses_singletons() {
    let a = RuleExpr::leaf("Birth", json!({}));
    let b = RuleExpr::leaf("Luminosity", json!({"min": 1.0}));
    let c = RuleExpr::leaf("Spectr", json!({"value": "O"}));
    assert_eq!(RuleExpr::from_groups(vec![vec![a.clone()]]), a);

    let rule = RuleExpr::from_groups(vec![vec![a.clone()], vec![b.clone(), c.clone()]]);
    assert_eq!(rule, RuleExpr::And(vec![a, RuleExpr::Or(vec![b, c])]));
    assert_eq!(rule.leaf_count(), 3);
    assert!(rule.validate().is_ok());
}

#[test]
fn test_rule_rejects_placeholder_and_unknown_kinds() {
    let placeholder = RuleExpr::from_groups(vec![vec![
        RuleExpr::leaf("Birth", json!({})),
        RuleExpr::leaf("None", json!({})),
    ]]);
    assert!(placeholder.validate().is_err());
    assert!(RuleExpr::leaf("Sparkle", json!({})).validate().is_err());
    assert!(RuleExpr::Or(Vec::new()).validate().is_err());
}

#[test]
fn test_rule_json_shape() {
    let value = json!({
        "type": "And",
        "rules": [
            {"type": "StarType", "value": 3},
            {"type": "Composite", "rule": {"type": "ThemeId", "ids": [1, 2]},
             "condition": {"type": "gte", "value": 2}}
        ]
    });
    let rule: RuleExpr = serde_json::from_value(value.clone()).unwrap();
    assert_eq!(rule.kind(), "And");
    assert_eq!(rule.leaf_count(), 2);
    assert!(rule.validate().is_ok());
    assert_eq!(serde_json::to_value(&rule).unwrap(), value);
}

#[test]
fn test_rule_composite_needs_condition() {
    let value = json!({"type": "Composite", "rule": {"type": "PlanetCount", "min": 3}});
    let rule: RuleExpr = serde_json::from_value(value).unwrap();
    assert!(rule.validate().is_err());
    assert!(serde_json::from_value::<RuleExpr>(json!({"rules": []})).is_err());
}

// --- protocol ---

#[test]
fn test_worker_request_shapes() {
    let find = WorkerRequest::Find(FindInput {
        game: GameDesc::default().with_seed(5),
        rule: rule(),
    });
    assert_eq!(
        serde_json::to_value(&find).unwrap(),
        json!({"type": "find", "input": {
            "game": {"seed": 5, "starCount": 64, "resourceMultiplier": 1.0},
            "rule": {"type": "StarType", "value": 2}
        }})
    );
    assert_eq!(
        serde_json::to_value(WorkerRequest::Next(7)).unwrap(),
        json!({"type": "next", "input": 7})
    );
    assert_eq!(find.seed(), 5);
}

#[test]
fn test_worker_response_accepts_matched_indexes() {
    let r: WorkerResponse =
        serde_json::from_value(json!({"type": "find", "data": {"seed": 9, "matchedIndexes": [2]}}))
            .unwrap();
    assert_eq!(
        r,
        WorkerResponse::Find {
            data: MatchResult {
                seed: 9,
                indexes: vec![2]
            }
        }
    );
}

#[test]
fn test_remote_messages() {
    let done: RemoteEvent = serde_json::from_str(r#"{"type":"Done"}"#).unwrap();
    assert_eq!(done, RemoteEvent::Done { end: None });
    let progress: RemoteEvent = serde_json::from_str(r#"{"type":"Progress","end":40}"#).unwrap();
    assert_eq!(progress, RemoteEvent::Progress { end: 40 });
    assert_eq!(
        serde_json::to_value(RemoteRequest::Stop).unwrap(),
        json!({"type": "Stop"})
    );
}

#[test]
fn test_remote_address_parsing() {
    assert_eq!(
        RemoteOracle::new("127.0.0.1:62879").unwrap().addr(),
        "127.0.0.1:62879"
    );
    assert_eq!(
        RemoteOracle::new("ws://localhost:9000/find").unwrap().addr(),
        "localhost:9000"
    );
    assert!(RemoteOracle::new("wss://example.com:443").is_err());
    assert!(RemoteOracle::new("localhost").is_err());
}

#[test]
fn test_generator_worker_next_reuses_find_context() {
    let mut worker = GeneratorWorker::new(FakeGen::matching(&[4]));
    assert!(worker.call(&WorkerRequest::Next(4)).is_err());
    worker
        .call(&WorkerRequest::Find(FindInput {
            game: GameDesc::default().with_seed(3),
            rule: rule(),
        }))
        .unwrap();
    match worker.call(&WorkerRequest::Next(4)).unwrap() {
        WorkerResponse::Find { data } => assert_eq!(data.indexes, vec![1]),
        other => panic!("unexpected {:?}", other),
    }
}

// --- validation ---

#[test]
fn test_validate_checkpoint() {
    assert!(validate_checkpoint(&request("p", 0, 10, 1)).is_ok());
    assert!(validate_checkpoint(&request("p", 10, 10, 1)).is_err());
    assert!(validate_checkpoint(&request("p", 0, 10, 0)).is_err());
    assert!(validate_checkpoint(&request("p", 0, 100_000_001, 1)).is_err());
    let mut cp = request("p", 0, 10, 1);
    cp.autosave = 0.0;
    assert!(validate_checkpoint(&cp).is_err());
    let mut cp = request("p", 0, 10, 1);
    cp.star_count = 16;
    assert!(validate_checkpoint(&cp).is_err());
}

#[test]
fn test_invalid_request_fires_no_callbacks() {
    let mut store = MemStore::default();
    let mut req = request("p", 0, 10, 2);
    req.rule = RuleExpr::leaf("None", json!({}));
    let (out, observer) = search(FakeGen::default(), &mut store, &req, &StopHandle::new());
    assert!(out.is_err());
    assert!(observer.0.is_empty());
    assert_eq!(store.saves, 0);
}

// --- range search ---

#[test]
fn test_search_scenario_single_match() {
    let generator = FakeGen::matching(&[7]);
    let tracker = Arc::clone(&generator.tracker);
    let mut store = MemStore::default();
    let (out, observer) = search(generator, &mut store, &request("p", 0, 10, 3), &StopHandle::new());

    assert_eq!(out.unwrap(), Termination::Completed);
    assert_eq!(observer.results(), vec![7]);
    assert_eq!(observer.progress().last(), Some(&10));
    assert_eq!(observer.0.last(), Some(&Event::Complete));
    assert_eq!(observer.terminals().len(), 1);
    assert_eq!(tracker.seen_sorted(), (0..10).collect::<Vec<_>>());
    assert!(tracker.peak.load(Ordering::SeqCst) <= 3);

    let record = store.record.unwrap();
    assert_eq!(record.current, 10);
    assert_eq!(record.found, 1);
    assert_eq!(store.matches.len(), 1);
}

#[test]
fn test_search_never_exceeds_concurrency() {
    let generator = FakeGen {
        delay: Duration::from_millis(1),
        ..FakeGen::matching(&[3, 50, 199])
    };
    let tracker = Arc::clone(&generator.tracker);
    let mut store = MemStore::default();
    let mut req = request("p", 0, 200, 4);
    req.autosave = 0.01;
    let (out, observer) = search(generator, &mut store, &req, &StopHandle::new());

    assert_eq!(out.unwrap(), Termination::Completed);
    assert!(tracker.peak.load(Ordering::SeqCst) <= 4);
    // every seed evaluated exactly once
    assert_eq!(tracker.seen_sorted(), (0..200).collect::<Vec<_>>());
    let mut results = observer.results();
    results.sort_unstable();
    assert_eq!(results, vec![3, 50, 199]);
    let progress = observer.progress();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&200));
}

#[test]
fn test_search_concurrency_clamped_to_range() {
    let generator = FakeGen::default();
    let tracker = Arc::clone(&generator.tracker);
    let mut store = MemStore::default();
    let (out, _) = search(generator, &mut store, &request("p", 0, 2, 16), &StopHandle::new());
    assert_eq!(out.unwrap(), Termination::Completed);
    assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn test_search_stop_after_three_dispatched() {
    let stop = StopHandle::new();
    let generator = FakeGen {
        stop_after: Some((3, stop.clone())),
        delay: Duration::from_millis(20),
        ..FakeGen::default()
    };
    let tracker = Arc::clone(&generator.tracker);
    let mut store = MemStore::default();
    let (out, observer) = search(generator, &mut store, &request("p", 0, 10, 3), &stop);

    assert_eq!(out.unwrap(), Termination::Interrupted);
    assert_eq!(observer.terminals(), vec![&Event::Interrupt]);
    let frontier = store.record.unwrap().current;
    assert!(frontier <= 6, "frontier {} past 6", frontier);
    assert!(tracker.calls.load(Ordering::SeqCst) <= 6);
    assert_eq!(observer.progress().last(), Some(&frontier));
}

#[test]
fn test_search_stopped_before_start_is_interrupted() {
    let stop = StopHandle::new();
    stop.stop();
    let generator = FakeGen::default();
    let tracker = Arc::clone(&generator.tracker);
    let mut store = MemStore::default();
    let (out, observer) = search(generator, &mut store, &request("p", 0, 10, 2), &stop);
    assert_eq!(out.unwrap(), Termination::Interrupted);
    assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    assert_eq!(observer.terminals(), vec![&Event::Interrupt]);
}

#[test]
fn test_search_resumes_from_checkpoint() {
    let generator = FakeGen::matching(&[2, 8]);
    let tracker = Arc::clone(&generator.tracker);
    let mut store = MemStore {
        record: Some(Checkpoint {
            current: 6,
            found: 1,
            ..request("p", 0, 10, 2)
        }),
        matches: vec![MatchResult {
            seed: 2,
            indexes: vec![1],
        }],
        ..MemStore::default()
    };
    let (out, observer) = search(generator, &mut store, &request("p", 0, 10, 2), &StopHandle::new());

    assert_eq!(out.unwrap(), Termination::Completed);
    assert_eq!(tracker.seen_sorted(), vec![6, 7, 8, 9]);
    assert_eq!(observer.results(), vec![8]);
    let record = store.record.unwrap();
    assert_eq!(record.current, 10);
    assert_eq!(record.found, 2);
}

#[test]
fn test_search_refound_seed_is_counted_once() {
    // an earlier run recorded seed 7 ahead of its frontier before stopping
    let mut store = MemStore {
        record: Some(Checkpoint {
            current: 5,
            found: 1,
            ..request("p", 0, 10, 2)
        }),
        matches: vec![MatchResult {
            seed: 7,
            indexes: vec![1],
        }],
        ..MemStore::default()
    };
    let (out, observer) = search(
        FakeGen::matching(&[7]),
        &mut store,
        &request("p", 0, 10, 2),
        &StopHandle::new(),
    );

    assert_eq!(out.unwrap(), Termination::Completed);
    assert_eq!(observer.results(), vec![7]);
    assert_eq!(store.record.as_ref().unwrap().found, 1);
    assert!(
        store.claimed.iter().all(|&found| found == 1),
        "checkpoints claimed {:?}",
        store.claimed
    );
}

#[test]
fn test_search_already_complete() {
    let generator = FakeGen::default();
    let tracker = Arc::clone(&generator.tracker);
    let mut store = MemStore {
        record: Some(Checkpoint {
            current: 10,
            ..request("p", 0, 10, 2)
        }),
        ..MemStore::default()
    };
    let (out, observer) = search(generator, &mut store, &request("p", 0, 10, 2), &StopHandle::new());
    assert_eq!(out.unwrap(), Termination::Completed);
    assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    assert_eq!(observer.0, vec![Event::Progress(10), Event::Complete]);
}

#[test]
fn test_search_worker_error_flushes_and_reports() {
    let generator = FakeGen {
        fail_on: Some(4),
        ..FakeGen::matching(&[1])
    };
    let mut store = MemStore::default();
    let (out, observer) = search(generator, &mut store, &request("p", 0, 10, 1), &StopHandle::new());

    let err = out.unwrap_err();
    assert!(format!("{:#}", err).contains("bad seed 4"));
    assert_eq!(observer.terminals(), vec![&Event::Error]);
    assert_eq!(observer.results(), vec![1]);
    assert_eq!(store.matches.iter().map(|m| m.seed).collect::<Vec<_>>(), vec![1]);
    assert_eq!(store.record.unwrap().current, 4);
}

#[test]
fn test_search_worker_panic_is_an_error() {
    let generator = FakeGen {
        panic_on: Some(2),
        ..FakeGen::default()
    };
    let mut store = MemStore::default();
    let (out, observer) = search(generator, &mut store, &request("p", 0, 10, 2), &StopHandle::new());
    assert!(out.is_err());
    assert_eq!(observer.terminals(), vec![&Event::Error]);
    assert!(store.record.unwrap().current <= 2);
}

#[test]
fn test_run_search_with_local_oracle() {
    let oracle = LocalOracle::with_generator(|| FakeGen::matching(&[0]));
    let mut store = MemStore::default();
    let mut observer = Recorder::default();
    let out = run_search(
        &oracle,
        &mut store,
        &request("p", 0, 3, 1),
        &StopHandle::new(),
        &mut observer,
    );
    assert_eq!(out.unwrap(), Termination::Completed);
    assert_eq!(observer.results(), vec![0]);
}

// --- remote backend ---

type ServerSocket = WebSocket<TcpStream>;

/// Next text frame from the client, or None once the connection is gone.
fn read_text(ws: &mut ServerSocket) -> Option<Value> {
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn send_event(ws: &mut ServerSocket, event: Value) {
    ws.send(Message::Text(event.to_string())).unwrap();
}

/// Collect whatever the client still sends until it hangs up.
fn drain(ws: &mut ServerSocket, received: &mut Vec<Value>) {
    while let Some(msg) = read_text(ws) {
        received.push(msg);
    }
}

/// One-connection generator server on a free local port. `script` runs after the client's
/// first message; the join handle yields every message received.
fn remote_server<F>(script: F) -> (String, JoinHandle<Vec<Value>>)
where
    F: FnOnce(&mut ServerSocket, &mut Vec<Value>) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut ws = tungstenite::accept(stream).unwrap();
        let mut received: Vec<Value> = read_text(&mut ws).into_iter().collect();
        script(&mut ws, &mut received);
        received
    });
    (addr, handle)
}

fn remote_search(
    addr: &str,
    store: &mut MemStore,
    stop: &StopHandle,
) -> (Result<Termination>, Recorder) {
    let oracle = RemoteOracle::new(addr).unwrap();
    let mut observer = Recorder::default();
    let out = run_search(&oracle, store, &request("r", 0, 10, 2), stop, &mut observer);
    (out, observer)
}

fn count_type(received: &[Value], kind: &str) -> usize {
    received.iter().filter(|m| m["type"] == kind).count()
}

#[test]
fn test_remote_find_carries_range_and_settings() {
    let (addr, server) = remote_server(|ws, received| {
        send_event(ws, json!({"type": "Done", "end": 10}));
        drain(ws, received);
    });
    let mut store = MemStore::default();
    let (out, _) = remote_search(&addr, &mut store, &StopHandle::new());
    assert_eq!(out.unwrap(), Termination::Completed);

    let received = server.join().unwrap();
    let find = &received[0];
    assert_eq!(find["type"], "Find");
    assert_eq!(find["range"], json!([0, 10]));
    assert_eq!(find["concurrency"], json!(2));
    assert_eq!(find["autosave"], json!(5.0));
    assert_eq!(find["rule"], json!({"type": "StarType", "value": 2}));
    assert_eq!(count_type(&received, "Stop"), 0);
}

#[test]
fn test_remote_close_before_done_is_interrupted() {
    let (addr, server) = remote_server(|ws, received| {
        send_event(ws, json!({"type": "Result", "seed": 3, "indexes": [1]}));
        send_event(ws, json!({"type": "Progress", "end": 5}));
        ws.close(None).unwrap();
        let _ = ws.flush();
        drain(ws, received);
    });
    let mut store = MemStore::default();
    let (out, observer) = remote_search(&addr, &mut store, &StopHandle::new());
    server.join().unwrap();

    assert_eq!(out.unwrap(), Termination::Interrupted);
    assert_eq!(observer.results(), vec![3]);
    assert_eq!(observer.progress().last(), Some(&5));
    assert_eq!(observer.terminals(), vec![&Event::Interrupt]);
    assert_eq!(store.record.unwrap().current, 5);
    assert_eq!(store.matches.len(), 1);
}

#[test]
fn test_remote_stop_is_forwarded_once() {
    let (addr, server) = remote_server(|ws, received| {
        // the client was stopped before connecting, so Stop follows Find
        if let Some(msg) = read_text(ws) {
            received.push(msg);
        }
        send_event(ws, json!({"type": "Result", "seed": 2, "indexes": [0]}));
        send_event(ws, json!({"type": "Done", "end": 3}));
        drain(ws, received);
    });
    let stop = StopHandle::new();
    stop.stop();
    let mut store = MemStore::default();
    let (out, observer) = remote_search(&addr, &mut store, &stop);
    let received = server.join().unwrap();

    assert_eq!(count_type(&received, "Find"), 1);
    assert_eq!(count_type(&received, "Stop"), 1);
    assert_eq!(received[1]["type"], "Stop");
    assert_eq!(out.unwrap(), Termination::Interrupted);
    assert_eq!(observer.results(), vec![2]);
    assert_eq!(observer.progress().last(), Some(&3));
    assert_eq!(store.record.unwrap().current, 3);
}

#[test]
fn test_remote_done_without_end_completes_unstopped_run() {
    let (addr, server) = remote_server(|ws, received| {
        send_event(ws, json!({"type": "Result", "seed": 9, "indexes": [2]}));
        // outside the range: dropped
        send_event(ws, json!({"type": "Result", "seed": 42, "indexes": [0]}));
        // empty: scanned, not a match
        send_event(ws, json!({"type": "Result", "seed": 4, "indexes": []}));
        // clamped to the range end
        send_event(ws, json!({"type": "Progress", "end": 99}));
        send_event(ws, json!({"type": "Done"}));
        drain(ws, received);
    });
    let mut store = MemStore::default();
    let (out, observer) = remote_search(&addr, &mut store, &StopHandle::new());
    server.join().unwrap();

    assert_eq!(out.unwrap(), Termination::Completed);
    assert_eq!(observer.results(), vec![9]);
    assert!(observer.progress().iter().all(|&f| f <= 10));
    assert_eq!(observer.progress().last(), Some(&10));
    assert_eq!(observer.0.last(), Some(&Event::Complete));
    let record = store.record.unwrap();
    assert_eq!(record.current, 10);
    assert_eq!(record.found, 1);
}

#[test]
fn test_remote_connection_reset_is_an_error() {
    let (addr, server) = remote_server(|ws, _received| {
        send_event(ws, json!({"type": "Result", "seed": 1, "indexes": [0]}));
        // hang up without a closing handshake
        let _ = ws.get_mut().shutdown(std::net::Shutdown::Both);
    });
    let mut store = MemStore::default();
    let (out, observer) = remote_search(&addr, &mut store, &StopHandle::new());
    server.join().unwrap();

    assert!(out.is_err());
    assert_eq!(observer.terminals(), vec![&Event::Error]);
    assert_eq!(
        store.matches.iter().map(|m| m.seed).collect::<Vec<_>>(),
        vec![1]
    );
}

// --- export ---

fn jobs(seeds: &[u32]) -> Vec<ExportJob> {
    seeds
        .iter()
        .map(|&seed| ExportJob {
            seed,
            indexes: vec![seed % 3],
        })
        .collect()
}

/// Collects the artifact keys it was handed.
struct KeysAggregator;

impl Aggregator for KeysAggregator {
    type Output = Vec<u32>;

    fn aggregate(
        self,
        jobs: &[ExportJob],
        artifacts: HashMap<u32, Artifact>,
    ) -> Result<Self::Output> {
        assert_eq!(jobs.len(), artifacts.len());
        for (seed, artifact) in &artifacts {
            assert_eq!(artifact["seed"], json!(seed));
        }
        let mut keys: Vec<u32> = artifacts.into_keys().collect();
        keys.sort_unstable();
        Ok(keys)
    }
}

#[test]
fn test_export_five_jobs_two_workers() {
    let generator = FakeGen {
        delay: Duration::from_millis(1),
        ..FakeGen::default()
    };
    let oracle = LocalOracle::with_generator(move || generator.clone());
    let mut ticks = Vec::new();
    let out = oracle
        .export(
            jobs(&[11, 3, 27, 8, 5]),
            &GameDesc::default(),
            false,
            2,
            &StopHandle::new(),
            KeysAggregator,
            |done, total| ticks.push((done, total)),
        )
        .unwrap();
    assert_eq!(out, Some(vec![3, 5, 8, 11, 27]));
    assert_eq!(ticks.len(), 5);
    assert!(ticks.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(ticks.last(), Some(&(5, 5)));
}

#[test]
fn test_export_csv_only_matched_stars() {
    let generator = FakeGen::default();
    let tracker = Arc::clone(&generator.tracker);
    let oracle = LocalOracle::with_generator(move || generator.clone());
    let export_jobs = vec![
        ExportJob {
            seed: 9,
            indexes: vec![2],
        },
        ExportJob {
            seed: 4,
            indexes: vec![0, 1],
        },
    ];
    let (rows, bytes) = oracle
        .export(
            export_jobs,
            &GameDesc::default(),
            false,
            2,
            &StopHandle::new(),
            CsvAggregator::new(Vec::new(), false),
            |_, _| {},
        )
        .unwrap()
        .unwrap();
    assert_eq!(rows, 3);
    let text = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "seed,index,matched,mass,name");
    assert_eq!(lines[1], "9,3,true,2,S9-2");
    assert_eq!(lines[2], "4,1,true,0,S4-0");
    assert_eq!(lines[3], "4,2,true,1,S4-1");

    let mut untils = tracker.untils.lock().unwrap().clone();
    untils.sort_unstable();
    assert_eq!(untils, vec![(4, Some(2)), (9, Some(3))]);
}

#[test]
fn test_export_csv_all_stars_flags_matches() {
    let oracle = LocalOracle::with_generator(FakeGen::default);
    let (rows, bytes) = oracle
        .export(
            jobs(&[1]),
            &GameDesc::default(),
            true,
            1,
            &StopHandle::new(),
            CsvAggregator::new(Vec::new(), true),
            |_, _| {},
        )
        .unwrap()
        .unwrap();
    assert_eq!(rows, 4);
    let text = String::from_utf8(bytes).unwrap();
    let matched: Vec<&str> = text
        .lines()
        .skip(1)
        .map(|l| l.split(',').nth(2).unwrap())
        .collect();
    assert_eq!(matched, vec!["false", "true", "false", "false"]);
}

#[test]
fn test_export_stopped_returns_none() {
    let stop = StopHandle::new();
    stop.stop();
    let oracle = LocalOracle::with_generator(FakeGen::default);
    let out = oracle
        .export(
            jobs(&[1, 2, 3]),
            &GameDesc::default(),
            false,
            2,
            &stop,
            KeysAggregator,
            |_, _| {},
        )
        .unwrap();
    assert_eq!(out, None);
}

#[test]
fn test_job_request_until() {
    let job = ExportJob {
        seed: 42,
        indexes: vec![5, 1],
    };
    match job_request(&job, &GameDesc::default(), false) {
        WorkerRequest::Generate(game) => {
            assert_eq!(game.seed, 42);
            assert_eq!(game.until, Some(6));
        }
        other => panic!("unexpected {:?}", other),
    }
    match job_request(&job, &GameDesc::default(), true) {
        WorkerRequest::Generate(game) => assert_eq!(game.until, None),
        other => panic!("unexpected {:?}", other),
    }
}
