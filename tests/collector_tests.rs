//! In-process integration tests for the collector.
//!
//! These drive the public runtime API directly: allocate, root or drop,
//! collect, then inspect what survived.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use reclaim::runtime::HeapCounts;
use reclaim::runtime::object::LocVar;
use reclaim::runtime::tagmethod::{NIL_TAG, TABLE_TAG};
use reclaim::{
    CallFrame, CriticalSection, ProtoSpec, RefId, RefMode, RefState, Runtime, RuntimeConfig,
    RuntimeError, TagEvent, Value,
};

fn bump_global(rt: &mut Runtime, name: &str) -> Result<(), RuntimeError> {
    let n = rt.get_global(name)?.as_number().unwrap_or(0.0);
    rt.set_global(name, Value::Number(n + 1.0))
}

fn count_finalized(rt: &mut Runtime, _: &CallFrame) -> Result<(), RuntimeError> {
    bump_global(rt, "finalized")
}

fn global_count(rt: &mut Runtime, name: &str) -> f64 {
    rt.get_global(name).unwrap().as_number().unwrap_or(0.0)
}

// Reachability

#[test]
fn test_unreachable_cycle_is_reclaimed() {
    let mut rt = Runtime::new();
    let a = rt.new_table(0).unwrap();
    let b = rt.new_table(0).unwrap();
    let next = rt.intern_str("next").unwrap();
    rt.table_set(a, Value::String(next), Value::Table(b)).unwrap();
    rt.table_set(b, Value::String(next), Value::Table(a)).unwrap();
    let c = rt.new_native_closure(|_, _| Ok(()), vec![Value::Table(a)]).unwrap();
    rt.table_set(b, Value::Number(1.0), Value::Closure(c)).unwrap();

    rt.collect_garbage().unwrap();
    assert!(rt.table(a).is_none());
    assert!(rt.table(b).is_none());
    assert!(rt.closure(c).is_none());
}

#[test]
fn test_roots_keep_objects_alive() {
    let mut rt = Runtime::new();

    let on_stack = rt.new_table(0).unwrap();
    rt.push(Value::Table(on_stack)).unwrap();

    let in_global = rt.intern_str("global payload").unwrap();
    rt.set_global("payload", Value::String(in_global)).unwrap();

    let locked = rt.new_table(0).unwrap();
    let r = rt.acquire_ref(Value::Table(locked), RefMode::Lock).unwrap();

    let tag = rt.new_tag("resource").unwrap();
    let upvalue = rt.new_table(0).unwrap();
    let method = rt
        .new_native_closure(|_, _| Ok(()), vec![Value::Table(upvalue)])
        .unwrap();
    rt.set_finalizer(tag, method).unwrap();

    rt.collect_garbage().unwrap();
    assert!(rt.table(on_stack).is_some());
    assert!(rt.string(in_global).is_some());
    assert!(rt.table(locked).is_some());
    assert_eq!(rt.ref_state(r), Some(RefState::Locked));
    assert!(rt.closure(method).is_some());
    assert!(rt.table(upvalue).is_some());
}

#[test]
fn test_other_thread_stack_is_a_root() {
    let mut rt = Runtime::new();
    let main = rt.current_thread();
    let worker = rt.spawn_thread();
    rt.switch_thread(worker).unwrap();
    let t = rt.new_table(0).unwrap();
    rt.push(Value::Table(t)).unwrap();
    rt.switch_thread(main).unwrap();

    rt.collect_garbage().unwrap();
    assert!(rt.table(t).is_some());

    rt.close_thread(worker).unwrap();
    rt.collect_garbage().unwrap();
    assert!(rt.table(t).is_none());
}

#[test]
fn test_popped_values_are_not_roots() {
    let mut rt = Runtime::new();
    let t = rt.new_table(0).unwrap();
    rt.push(Value::Table(t)).unwrap();
    assert_eq!(rt.pop(), Some(Value::Table(t)));

    rt.collect_garbage().unwrap();
    assert!(rt.table(t).is_none());
}

#[test]
fn test_prototype_graph_marked_through_closure() {
    let mut rt = Runtime::new();
    let inner_const = rt.intern_str("inner constant").unwrap();
    let inner = rt
        .new_proto(ProtoSpec {
            line_defined: 3,
            kstr: vec![inner_const],
            ..ProtoSpec::default()
        })
        .unwrap();
    let outer_const = rt.intern_str("outer constant").unwrap();
    let local = rt.intern_str("x").unwrap();
    let outer = rt
        .new_proto(ProtoSpec {
            line_defined: 1,
            code: vec![0; 16],
            kstr: vec![outer_const],
            kproto: vec![inner],
            locvars: vec![LocVar {
                name: local,
                end_line: 4,
            }],
            ..ProtoSpec::default()
        })
        .unwrap();
    let f = rt.new_script_closure(outer, vec![]).unwrap();
    rt.set_global("f", Value::Closure(f)).unwrap();

    rt.collect_garbage().unwrap();
    assert!(rt.proto(outer).is_some());
    assert!(rt.proto(inner).is_some());
    assert!(rt.string(inner_const).is_some());
    assert!(rt.string(outer_const).is_some());
    assert!(rt.string(local).is_some());

    rt.set_global("f", Value::Nil).unwrap();
    rt.collect_garbage().unwrap();
    assert!(rt.closure(f).is_none());
    assert!(rt.proto(outer).is_none());
    assert!(rt.proto(inner).is_none());
    assert!(rt.string(inner_const).is_none());
    assert!(rt.string(local).is_none());
}

#[test]
fn test_second_cycle_frees_nothing() {
    let mut rt = Runtime::new();
    let keep = rt.new_table(0).unwrap();
    rt.set_global("keep", Value::Table(keep)).unwrap();
    for i in 0..50 {
        let s = rt.intern_str(&format!("s{}", i)).unwrap();
        if i % 2 == 0 {
            rt.table_set(keep, Value::Number(i as f64), Value::String(s))
                .unwrap();
        }
    }

    rt.collect_garbage().unwrap();
    let blocks = rt.blocks();
    let counts = rt.heap().counts();

    rt.collect_garbage().unwrap();
    assert_eq!(rt.gc_stats().last_freed.total(), 0);
    assert_eq!(rt.blocks(), blocks);
    assert_eq!(rt.heap().counts(), counts);
}

// External references

#[test]
fn test_held_reference_turns_collected_and_stays() {
    let mut rt = Runtime::new();
    let t = rt.new_table(0).unwrap();
    let r = rt.acquire_ref(Value::Table(t), RefMode::Hold).unwrap();
    assert_eq!(rt.get_ref(r), Some(Value::Table(t)));

    rt.collect_garbage().unwrap();
    assert_eq!(rt.ref_state(r), Some(RefState::Collected));
    assert_eq!(rt.get_ref(r), None);

    rt.collect_garbage().unwrap();
    assert_eq!(rt.ref_state(r), Some(RefState::Collected));
    assert_eq!(rt.gc_stats().refs_collected, 1);

    rt.release_ref(r).unwrap();
    assert_eq!(rt.ref_state(r), None);
    assert!(rt.set_ref_mode(r, RefMode::Lock).is_err());
}

#[test]
fn test_demoted_lock_is_collected() {
    let mut rt = Runtime::new();
    let t = rt.new_table(0).unwrap();
    let r = rt.acquire_ref(Value::Table(t), RefMode::Lock).unwrap();
    rt.collect_garbage().unwrap();
    assert!(rt.table(t).is_some());

    rt.set_ref_mode(r, RefMode::Hold).unwrap();
    rt.collect_garbage().unwrap();
    assert!(rt.table(t).is_none());
    assert_eq!(rt.ref_state(r), Some(RefState::Collected));
}

#[test]
fn test_reference_table_overflow() {
    let config = RuntimeConfig {
        ref_capacity: 2,
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::with_config(config).unwrap();
    let first = rt.acquire_ref(Value::Number(1.0), RefMode::Lock).unwrap();
    rt.acquire_ref(Value::Number(2.0), RefMode::Lock).unwrap();
    let err = rt.acquire_ref(Value::Number(3.0), RefMode::Lock).unwrap_err();
    assert!(matches!(err, RuntimeError::Memory(_)));

    rt.release_ref(first).unwrap();
    let reused = rt.acquire_ref(Value::Number(3.0), RefMode::Lock).unwrap();
    assert_eq!(reused, first);
}

// Finalization

#[test]
fn test_finalizers_run_in_reverse_tag_order() {
    let lines = reclaim::workload::Scenario::FinalizerOrder
        .run(&RuntimeConfig::default())
        .unwrap();
    assert_eq!(lines, vec!["registered: 7 then 10", "finalized: 10 then 7"]);
}

#[test]
fn test_finalizer_receives_userdata_and_frees_it() {
    fn check(rt: &mut Runtime, frame: &CallFrame) -> Result<(), RuntimeError> {
        let u = rt
            .arg(frame, 0)
            .as_userdata()
            .ok_or_else(|| RuntimeError::runtime("expected userdata"))?;
        let payload = rt.userdata(u).map_or(0, |u| u.payload);
        rt.set_global("payload", Value::Number(payload as f64))?;
        rt.set_global("hooks", Value::Number(f64::from(u8::from(rt.allow_hooks()))))
    }

    let mut rt = Runtime::new();
    let tag = rt.new_tag("file").unwrap();
    let f = rt.new_native_closure(check, vec![]).unwrap();
    rt.set_finalizer(tag, f).unwrap();
    let u = rt.new_userdata(0xBEEF, tag).unwrap();

    rt.collect_garbage().unwrap();
    assert_eq!(global_count(&mut rt, "payload"), 0xBEEF as f64);
    assert_eq!(global_count(&mut rt, "hooks"), 0.0);
    assert!(rt.allow_hooks());
    assert!(rt.userdata(u).is_none());
    assert_eq!(rt.gc_stats().finalizers_run, 1);
}

#[test]
fn test_objects_created_by_finalizer_survive() {
    fn stash(rt: &mut Runtime, _: &CallFrame) -> Result<(), RuntimeError> {
        let t = rt.new_table(0)?;
        let s = rt.intern_str("made during collection")?;
        rt.table_set(t, Value::Number(1.0), Value::String(s))?;
        rt.set_global("stash", Value::Table(t))
    }

    let mut rt = Runtime::new();
    let tag = rt.new_tag("resource").unwrap();
    let f = rt.new_native_closure(stash, vec![]).unwrap();
    rt.set_finalizer(tag, f).unwrap();
    rt.new_userdata(1, tag).unwrap();

    rt.collect_garbage().unwrap();
    let t = rt.get_global("stash").unwrap().as_table().unwrap();
    assert!(rt.table(t).is_some());
    let s = rt.table_get(t, Value::Number(1.0)).unwrap();
    assert!(rt.string(s.as_string().unwrap()).is_some());

    rt.collect_garbage().unwrap();
    assert!(rt.table(t).is_some());
}

#[test]
fn test_reference_taken_by_finalizer_turns_collected() {
    fn lock_arg(rt: &mut Runtime, frame: &CallFrame) -> Result<(), RuntimeError> {
        let r = rt.acquire_ref(rt.arg(frame, 0), RefMode::Lock)?;
        rt.set_global("ref", Value::Number(f64::from(r.0)))
    }

    let mut rt = Runtime::new();
    let tag = rt.new_tag("resource").unwrap();
    let f = rt.new_native_closure(lock_arg, vec![]).unwrap();
    rt.set_finalizer(tag, f).unwrap();
    rt.new_userdata(1, tag).unwrap();

    rt.collect_garbage().unwrap();
    let r = RefId(global_count(&mut rt, "ref") as i32);
    assert_eq!(rt.ref_state(r), Some(RefState::Collected));
    assert_eq!(rt.get_ref(r), None);

    rt.collect_garbage().unwrap();
    assert_eq!(rt.ref_state(r), Some(RefState::Collected));
    rt.release_ref(r).unwrap();
}

#[test]
fn test_reference_to_reclaimed_object_rejected() {
    let mut rt = Runtime::new();
    let t = rt.new_table(0).unwrap();
    rt.collect_garbage().unwrap();
    assert!(rt.table(t).is_none());

    assert!(rt.acquire_ref(Value::Table(t), RefMode::Lock).is_err());
    assert_eq!(rt.refs_in_use(), 0);
    rt.collect_garbage().unwrap();
}

#[test]
fn test_collection_requests_inside_finalizer_are_deferred() {
    fn nested(rt: &mut Runtime, _: &CallFrame) -> Result<(), RuntimeError> {
        rt.collect_garbage()?;
        rt.collect_all()?;
        bump_global(rt, "finalized")
    }

    let mut rt = Runtime::new();
    let tag = rt.new_tag("resource").unwrap();
    let f = rt.new_native_closure(nested, vec![]).unwrap();
    rt.set_finalizer(tag, f).unwrap();
    rt.new_userdata(1, tag).unwrap();

    rt.collect_garbage().unwrap();
    assert_eq!(rt.gc_stats().cycles, 1);
    assert_eq!(rt.gc_stats().deferred_triggers, 2);
    assert_eq!(global_count(&mut rt, "finalized"), 1.0);
    assert!(!rt.is_collecting());
}

#[test]
fn test_finalizer_error_does_not_abort_cycle() {
    fn explode(_: &mut Runtime, _: &CallFrame) -> Result<(), RuntimeError> {
        Err(RuntimeError::runtime("boom"))
    }

    let mut rt = Runtime::new();
    let tag = rt.new_tag("resource").unwrap();
    let f = rt.new_native_closure(explode, vec![]).unwrap();
    rt.set_finalizer(tag, f).unwrap();
    let u = rt.new_userdata(1, tag).unwrap();
    let lost = rt.new_table(0).unwrap();

    let err = rt.collect_garbage().unwrap_err();
    assert_eq!(err.to_string(), "runtime error: boom");
    assert!(rt.userdata(u).is_none());
    assert!(rt.table(lost).is_none());
    assert_eq!(rt.gc_stats().finalizer_errors, 1);
    assert!(!rt.is_collecting());

    rt.collect_garbage().unwrap();
}

#[test]
fn test_gc_event_only_for_userdata_and_nil_tags() {
    let mut rt = Runtime::new();
    let f = rt.new_native_closure(count_finalized, vec![]).unwrap();
    assert!(rt.set_tag_method(TABLE_TAG, TagEvent::Gc, Some(f)).is_err());
    assert!(rt.set_tag_method(NIL_TAG, TagEvent::Gc, Some(f)).is_ok());
    assert!(rt.set_tag_method(TABLE_TAG, TagEvent::Index, Some(f)).is_ok());
}

#[test]
fn test_post_collection_hook_called_with_nil() {
    fn hook(rt: &mut Runtime, frame: &CallFrame) -> Result<(), RuntimeError> {
        if !rt.arg(frame, 0).is_nil() {
            return Err(RuntimeError::runtime("expected nil"));
        }
        bump_global(rt, "cycles")
    }

    let mut rt = Runtime::new();
    let f = rt.new_native_closure(hook, vec![]).unwrap();
    rt.set_tag_method(NIL_TAG, TagEvent::Gc, Some(f)).unwrap();
    rt.collect_garbage().unwrap();
    rt.collect_garbage().unwrap();
    rt.collect_garbage().unwrap();
    assert_eq!(global_count(&mut rt, "cycles"), 3.0);
}

// Teardown

#[test]
fn test_collect_all_frees_everything() {
    let mut rt = Runtime::new();
    rt.intern_fixed("pinned").unwrap();
    let t = rt.new_table(0).unwrap();
    rt.set_global("t", Value::Table(t)).unwrap();
    rt.acquire_ref(Value::Table(t), RefMode::Lock).unwrap();

    rt.collect_garbage().unwrap();
    assert!(rt.heap().counts().strings > 0);

    rt.collect_all().unwrap();
    assert_eq!(rt.heap().counts(), HeapCounts::default());
}

#[test]
fn test_close_finalizes_reachable_userdata() {
    static CLOSED: AtomicUsize = AtomicUsize::new(0);

    fn on_close(_: &mut Runtime, _: &CallFrame) -> Result<(), RuntimeError> {
        CLOSED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    let mut rt = Runtime::new();
    let tag = rt.new_tag("handle").unwrap();
    let f = rt.new_native_closure(on_close, vec![]).unwrap();
    rt.set_finalizer(tag, f).unwrap();
    for i in 0..3 {
        let u = rt.new_userdata(i, tag).unwrap();
        rt.set_global(&format!("h{}", i), Value::Userdata(u)).unwrap();
    }

    rt.collect_garbage().unwrap();
    assert_eq!(CLOSED.load(Ordering::SeqCst), 0);
    rt.close().unwrap();
    assert_eq!(CLOSED.load(Ordering::SeqCst), 3);
}

// Heuristics

#[test]
fn test_string_table_never_shrinks_below_floor() {
    for floor in [8, 100] {
        let config = RuntimeConfig {
            string_table_floor: floor,
            ..RuntimeConfig::default()
        };
        let mut rt = Runtime::with_config(config).unwrap();
        for i in 0..1000 {
            rt.intern_str(&format!("transient {}", i)).unwrap();
        }
        let grown = rt.string_table_size();
        assert!(grown > 512);

        for _ in 0..20 {
            rt.collect_garbage().unwrap();
            assert!(
                rt.string_table_size() >= floor,
                "floor {}: shrank to {}",
                floor,
                rt.string_table_size()
            );
        }
        assert!(rt.string_table_size() < grown);
    }
}

#[test]
fn test_heap_limit_rejects_creation() {
    let config = RuntimeConfig {
        heap_limit: Some(64 * 1024),
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::with_config(config).unwrap();
    let mut err = None;
    for _ in 0..10_000 {
        if let Err(e) = rt.new_table(0) {
            err = Some(e);
            break;
        }
    }
    assert!(matches!(err, Some(RuntimeError::Memory(_))));

    rt.collect_garbage().unwrap();
    assert!(rt.new_table(0).is_ok());
}

#[test]
fn test_check_gc_triggers_at_threshold() {
    let config = RuntimeConfig {
        initial_threshold: 4096,
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::with_config(config).unwrap();
    let mut ran = false;
    for _ in 0..10_000 {
        rt.new_table(0).unwrap();
        if rt.check_gc().unwrap() {
            ran = true;
            break;
        }
    }
    assert!(ran);
    assert_eq!(rt.gc_threshold(), 2 * rt.blocks());
}

// Critical section

struct Counting {
    entered: Rc<Cell<usize>>,
    left: Rc<Cell<usize>>,
}

impl CriticalSection for Counting {
    fn enter(&self) {
        self.entered.set(self.entered.get() + 1);
    }

    fn leave(&self) {
        self.left.set(self.left.get() + 1);
    }
}

#[test]
fn test_critical_section_brackets_each_cycle() {
    let entered = Rc::new(Cell::new(0));
    let left = Rc::new(Cell::new(0));
    let mut rt = Runtime::new();
    rt.set_critical_section(Box::new(Counting {
        entered: entered.clone(),
        left: left.clone(),
    }));

    rt.collect_garbage().unwrap();
    rt.collect_garbage().unwrap();
    assert_eq!(entered.get(), 2);
    assert_eq!(left.get(), 2);

    rt.close().unwrap();
    assert_eq!(entered.get(), 3);
    assert_eq!(left.get(), 3);
}
