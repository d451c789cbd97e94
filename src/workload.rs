//! Synthetic heap workloads and built-in collector scenarios.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::gc::GcStats;
use crate::runtime::call::CallFrame;
use crate::runtime::refs::{RefId, RefMode, RefState};
use crate::runtime::value::Value;
use crate::runtime::{HeapCounts, Runtime};

const RESOURCE_TAG: &str = "stress.resource";
const FINALIZED: &str = "__finalized";

#[derive(Debug, Clone)]
pub struct StressOptions {
    pub rounds: usize,
    /// Tables allocated per round
    pub tables: usize,
    /// Strings interned per round
    pub strings: usize,
    /// Userdata created per round
    pub userdata: usize,
    pub seed: u64,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            rounds: 10,
            tables: 200,
            strings: 200,
            userdata: 50,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub rounds: usize,
    pub allocated: HeapCounts,
    pub live: HeapCounts,
    pub blocks: usize,
    pub finalized: usize,
    pub locked_refs: usize,
    pub held_refs: usize,
    pub held_collected: usize,
    pub gc: GcStats,
}

fn count_finalized(rt: &mut Runtime, frame: &CallFrame) -> Result<(), RuntimeError> {
    if rt.arg(frame, 0).as_userdata().is_none() {
        return Err(RuntimeError::runtime("finalizer expects a userdata"));
    }
    let n = rt.get_global(FINALIZED)?.as_number().unwrap_or(0.0);
    rt.set_global(FINALIZED, Value::Number(n + 1.0))
}

fn resource_tag(rt: &mut Runtime) -> Result<u32, RuntimeError> {
    match rt.type_tag(RESOURCE_TAG)? {
        Some(tag) => Ok(tag),
        None => rt.new_tag(RESOURCE_TAG),
    }
}

/// Allocate random tables, strings and userdata, keeping roughly half of
/// them reachable through globals and external references, with
/// `check_gc` after every allocation.
pub fn run_stress(rt: &mut Runtime, opts: &StressOptions) -> Result<StressReport, RuntimeError> {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let tag = resource_tag(rt)?;
    let finalizer = rt.new_native_closure(count_finalized, vec![])?;
    rt.set_finalizer(tag, finalizer)?;

    let keep = rt.new_table(0)?;
    rt.set_global("keep", Value::Table(keep))?;
    let prev_key = Value::String(rt.intern_fixed("prev")?);
    let next_key = Value::String(rt.intern_fixed("next")?);

    let mut allocated = HeapCounts::default();
    let mut locked: Vec<RefId> = Vec::new();
    let mut held: Vec<RefId> = Vec::new();
    let mut payload = 1usize;

    for round in 0..opts.rounds {
        for _ in 0..opts.tables {
            let t = rt.new_table(rng.gen_range(0..8))?;
            allocated.tables += 1;
            for j in 0..rng.gen_range(0..8) {
                rt.table_set(t, Value::Number(j as f64), Value::Number(rng.r#gen()))?;
            }
            // sometimes link to the previous table, occasionally closing a cycle
            if let Some(prev) = rt.get_global("last")?.as_table() {
                if rng.gen_bool(0.3) {
                    rt.table_set(t, prev_key, Value::Table(prev))?;
                    if rng.gen_bool(0.5) {
                        rt.table_set(prev, next_key, Value::Table(t))?;
                    }
                }
            }
            rt.set_global("last", Value::Table(t))?;
            if rng.gen_bool(0.5) {
                let slot = rng.gen_range(0..64) as f64;
                rt.table_set(keep, Value::Number(slot), Value::Table(t))?;
            }
            match rng.gen_range(0..10) {
                0 => locked.push(rt.acquire_ref(Value::Table(t), RefMode::Lock)?),
                1 => held.push(rt.acquire_ref(Value::Table(t), RefMode::Hold)?),
                _ => {}
            }
            rt.check_gc()?;
        }

        for _ in 0..opts.strings {
            let len = rng.gen_range(1..24);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect();
            let s = rt.intern(&bytes)?;
            allocated.strings += 1;
            if rng.gen_bool(0.3) {
                rt.table_set(keep, Value::String(s), Value::Number(round as f64))?;
            }
            rt.check_gc()?;
        }

        for _ in 0..opts.userdata {
            let u = rt.new_userdata(payload, tag)?;
            payload += 1;
            allocated.userdata += 1;
            if rng.gen_bool(0.5) {
                let slot = (64 + rng.gen_range(0..64)) as f64;
                rt.table_set(keep, Value::Number(slot), Value::Userdata(u))?;
            }
            rt.check_gc()?;
        }

        if !locked.is_empty() && rng.gen_bool(0.5) {
            let i = rng.gen_range(0..locked.len());
            rt.release_ref(locked.swap_remove(i))?;
        }
    }

    rt.collect_garbage()?;

    for &r in &locked {
        let alive = rt
            .get_ref(r)
            .and_then(|v| v.as_table())
            .is_some_and(|t| rt.table(t).is_some());
        if !alive {
            return Err(RuntimeError::runtime(format!(
                "locked reference {} lost its table",
                r.0
            )));
        }
    }
    let held_collected = held
        .iter()
        .filter(|&&r| rt.ref_state(r) == Some(RefState::Collected))
        .count();
    let finalized = rt.get_global(FINALIZED)?.as_number().unwrap_or(0.0) as usize;

    Ok(StressReport {
        rounds: opts.rounds,
        allocated,
        live: rt.heap().counts(),
        blocks: rt.blocks(),
        finalized,
        locked_refs: locked.len(),
        held_refs: held.len(),
        held_collected,
        gc: rt.gc_stats().clone(),
    })
}

/// Built-in demonstrations of collector behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// A table and a closure referencing each other, unreachable
    Cycle,
    /// A held reference to a string that loses its last referrer
    HoldRef,
    /// Finalizers on two tags, the later-registered one runs first
    FinalizerOrder,
    /// 1000 interned strings of which 990 become garbage
    InternShrink,
}

impl Scenario {
    pub fn name(self) -> &'static str {
        match self {
            Scenario::Cycle => "cycle",
            Scenario::HoldRef => "hold-ref",
            Scenario::FinalizerOrder => "finalizer-order",
            Scenario::InternShrink => "intern-shrink",
        }
    }

    /// Run on a fresh runtime; returns one line per observation.
    pub fn run(self, config: &RuntimeConfig) -> Result<Vec<String>, RuntimeError> {
        let mut rt = Runtime::with_config(config.clone())?;
        match self {
            Scenario::Cycle => cycle(&mut rt),
            Scenario::HoldRef => hold_ref(&mut rt),
            Scenario::FinalizerOrder => finalizer_order(&mut rt),
            Scenario::InternShrink => intern_shrink(&mut rt),
        }
    }
}

fn cycle(rt: &mut Runtime) -> Result<Vec<String>, RuntimeError> {
    let t = rt.new_table(0)?;
    let c = rt.new_native_closure(|_, _| Ok(()), vec![Value::Table(t)])?;
    let key = rt.intern_str("f")?;
    rt.table_set(t, Value::String(key), Value::Closure(c))?;
    rt.collect_garbage()?;
    Ok(vec![
        format!("table reclaimed: {}", rt.table(t).is_none()),
        format!("closure reclaimed: {}", rt.closure(c).is_none()),
    ])
}

fn hold_ref(rt: &mut Runtime) -> Result<Vec<String>, RuntimeError> {
    let s = rt.intern_str("held only by a reference")?;
    let r = rt.acquire_ref(Value::String(s), RefMode::Hold)?;
    let state = |rt: &Runtime| match rt.ref_state(r) {
        Some(RefState::Locked) => "locked",
        Some(RefState::Held) => "held",
        Some(RefState::Collected) => "collected",
        None => "free",
    };
    let mut lines = vec![format!("before collection: {}", state(rt))];
    rt.collect_garbage()?;
    lines.push(format!("after first cycle: {}", state(rt)));
    rt.collect_garbage()?;
    lines.push(format!("after second cycle: {}", state(rt)));
    Ok(lines)
}

fn record_order(rt: &mut Runtime, frame: &CallFrame) -> Result<(), RuntimeError> {
    let tag = rt.tag_of(rt.arg(frame, 0));
    let order = match rt.get_global("order")?.as_table() {
        Some(t) => t,
        None => return Err(RuntimeError::runtime("order table missing")),
    };
    let n = rt.table_len(order)?;
    rt.table_set(order, Value::Number((n + 1) as f64), Value::Number(tag as f64))
}

// Predefined type tags (0..NUM_TAGS) other than userdata and nil reject the
// `gc` event, so the two finalized tags are user tags: the 2nd and 5th
// registered, 7 and 10.
fn finalizer_order(rt: &mut Runtime) -> Result<Vec<String>, RuntimeError> {
    let order = rt.new_table(0)?;
    rt.set_global("order", Value::Table(order))?;
    let f = rt.new_native_closure(record_order, vec![])?;
    let tags: Vec<u32> = (1..=5)
        .map(|i| rt.new_tag(&format!("resource{}", i)))
        .collect::<Result<_, _>>()?;
    let (early, late) = (tags[1], tags[4]);
    rt.set_finalizer(early, f)?;
    rt.set_finalizer(late, f)?;
    rt.new_userdata(1, early)?;
    rt.new_userdata(2, late)?;
    rt.collect_garbage()?;

    let mut ran = Vec::new();
    for i in 1..=rt.table_len(order)? {
        if let Some(tag) = rt.table_get(order, Value::Number(i as f64))?.as_number() {
            ran.push((tag as u32).to_string());
        }
    }
    Ok(vec![
        format!("registered: {} then {}", early, late),
        format!("finalized: {}", ran.join(" then ")),
    ])
}

fn intern_shrink(rt: &mut Runtime) -> Result<Vec<String>, RuntimeError> {
    let keep = rt.new_table(16)?;
    rt.set_global("keep", Value::Table(keep))?;
    for i in 0..1000 {
        let s = rt.intern_str(&format!("string-{}", i))?;
        if i % 100 == 0 {
            rt.table_set(keep, Value::String(s), Value::Number(i as f64))?;
        }
    }
    let before = rt.string_table_size();
    rt.collect_garbage()?;
    let after_one = rt.string_table_size();
    for _ in 0..16 {
        rt.collect_garbage()?;
    }
    Ok(vec![
        format!("buckets before: {}", before),
        format!("buckets after one cycle: {}", after_one),
        format!("buckets after settling: {}", rt.string_table_size()),
        format!("floor: {}", rt.config().string_table_floor),
        format!("strings alive: {}", rt.heap().counts().strings),
    ])
}
