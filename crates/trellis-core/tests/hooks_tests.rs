//! Hook semantics: state slots, refs, memoization, reducers and context
//! values, observed through widget state and the operation log.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_core::{
    component, get_node, provide_context, render_fixed, use_callback, use_context, use_effect_deps,
    use_memo, use_reducer, use_ref, use_state, use_state_eq, use_state_keyed, Component, Dispatch,
    Element, NodeId, PropHandler, PropValue, Props, RenderErrorKind, SetState,
};
use trellis_testing::{recording_memory, Op};
use trellis_widgets::{button_type, label, Button, Label, MemoryBackend};

#[test]
fn state_persists_and_setters_schedule_renders() {
    thread_local! {
        static SET: RefCell<Option<SetState<i64>>> = const { RefCell::new(None) };
    }
    let counter = component("Counter", |_| {
        let (n, set_n) = use_state(|| 0i64)?;
        SET.with(|s| *s.borrow_mut() = Some(set_n));
        Ok(label(format!("count {n}")))
    });
    let (node, rc) = render_fixed(counter.el(Props::new()), MemoryBackend::new()).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "count 0"))
        .unwrap();
    assert_eq!(rc.render_count(), 1);

    let set = SET.with(|s| s.borrow().clone()).unwrap();
    // setting the value it already holds is suppressed
    set.set(0).unwrap();
    assert_eq!(rc.render_count(), 1);

    set.set(2).unwrap();
    assert_eq!(rc.render_count(), 2);
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "count 2"))
        .unwrap();
}

#[test]
fn setter_outliving_its_component_is_a_noop() {
    thread_local! {
        static SET: RefCell<Option<SetState<i64>>> = const { RefCell::new(None) };
    }
    let inner = component("Inner", |_| {
        let (n, set_n) = use_state(|| 0i64)?;
        SET.with(|s| *s.borrow_mut() = Some(set_n));
        Ok(label(format!("{n}")))
    });
    let outer = {
        let inner = inner.clone();
        component("Outer", move |props| {
            let show = props.bool_of("show").unwrap_or(false);
            let inner = inner.clone();
            trellis_widgets::column().nest(move || {
                if show {
                    let _ = inner.el(Props::new());
                }
            })
        })
    };
    let (_, rc) = render_fixed(outer.el(Props::new().with("show", true)), MemoryBackend::new())
        .unwrap();
    rc.render(outer.el(Props::new().with("show", false))).unwrap();
    let renders = rc.render_count();
    let set = SET.with(|s| s.borrow().clone()).unwrap();
    set.set(7).unwrap();
    assert_eq!(rc.render_count(), renders);
}

#[test]
fn use_ref_survives_rerenders() {
    let ticker = component("Ticker", |_| {
        let seen = use_ref(|| 0u32)?;
        seen.with_mut(|v| *v += 1);
        Ok(label(format!("{}", seen.get())))
    });
    let (node, rc) = render_fixed(ticker.el(Props::new()), MemoryBackend::new()).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "1"))
        .unwrap();
    rc.render(ticker.el(Props::new())).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "2"))
        .unwrap();
}

#[test]
fn use_memo_caches_by_deps() {
    thread_local! {
        static COMPUTES: Cell<u32> = const { Cell::new(0) };
    }
    let doubler = component("Doubler", |props| {
        let dep = props.int_of("dep").unwrap_or(0);
        let doubled = use_memo(
            || {
                COMPUTES.with(|c| c.set(c.get() + 1));
                dep * 2
            },
            &dep,
        )?;
        Ok(label(format!("{doubled}")))
    });
    let (node, rc) =
        render_fixed(doubler.el(Props::new().with("dep", 1i64)), MemoryBackend::new()).unwrap();
    assert_eq!(COMPUTES.with(Cell::get), 1);
    rc.render(doubler.el(Props::new().with("dep", 1i64))).unwrap();
    assert_eq!(COMPUTES.with(Cell::get), 1);
    rc.render(doubler.el(Props::new().with("dep", 3i64))).unwrap();
    assert_eq!(COMPUTES.with(Cell::get), 2);
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "6"))
        .unwrap();
}

#[test]
fn use_reducer_folds_actions() {
    thread_local! {
        static DISPATCH: RefCell<Option<Dispatch<i64>>> = const { RefCell::new(None) };
    }
    let acc = component("Acc", |_| {
        let (total, dispatch) = use_reducer(|state: &i64, delta: i64| state + delta, || 0i64)?;
        DISPATCH.with(|d| *d.borrow_mut() = Some(dispatch.clone()));
        Ok(label(format!("{total}")))
    });
    let (node, rc) = render_fixed(acc.el(Props::new()), MemoryBackend::new()).unwrap();
    let dispatch = DISPATCH.with(|d| d.borrow().clone()).unwrap();
    dispatch.dispatch(5).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "5"))
        .unwrap();
    dispatch.dispatch(-2).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "3"))
        .unwrap();
}

#[test]
fn context_reaches_descendants_with_nearest_provider_winning() {
    let leaf = component("Leaf", |_| {
        let theme: Rc<String> = use_context("theme")?;
        Ok(label((*theme).clone()))
    });
    let mid = {
        let leaf = leaf.clone();
        component("Mid", move |props| {
            if props.bool_of("override").unwrap_or(false) {
                provide_context("theme", "light".to_owned())?;
            }
            Ok(leaf.el(Props::new()))
        })
    };
    let root = {
        let mid = mid.clone();
        component("Root", move |props| {
            provide_context("theme", "dark".to_owned())?;
            Ok(mid.el(Props::new().with("override", props.bool_of("override").unwrap_or(false))))
        })
    };

    let (node, rc) =
        render_fixed(root.el(Props::new().with("override", false)), MemoryBackend::new()).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "dark"))
        .unwrap();
    rc.render(root.el(Props::new().with("override", true))).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "light"))
        .unwrap();
}

#[test]
fn missing_context_value_errors() {
    let leaf = component("Leaf", |_| {
        let theme: Rc<String> = use_context("theme")?;
        Ok(label((*theme).clone()))
    });
    let err = render_fixed(leaf.el(Props::new()), MemoryBackend::new()).unwrap_err();
    assert!(matches!(
        err.kind(),
        RenderErrorKind::ContextNotFound { key } if key == "theme"
    ));
}

#[test]
fn hooks_require_an_active_render() {
    let err = use_state(|| 0i64).unwrap_err();
    assert!(matches!(err.kind(), RenderErrorKind::NoActiveRenderContext));
}

#[test]
fn callback_handler_keeps_its_observer_registration() {
    let counter = component("Stable", |_| {
        let (n, set_n) = use_state(|| 0i64)?;
        let on_clicks = use_callback(
            move || {
                move |value: &PropValue| {
                    let _ = set_n.set(value.as_int().unwrap_or(0));
                }
            },
            &(),
        )?;
        let handler: PropHandler = on_clicks;
        Ok(Element::new(
            Component::Native(button_type()),
            Props::new()
                .with("description", format!("clicked {n}"))
                .with("on_clicks", PropValue::Handler(handler)),
        ))
    });
    let (backend, log) = recording_memory();
    let (node, rc) = render_fixed(counter.el(Props::new()), backend).unwrap();
    assert_eq!(log.count(|op| matches!(op, Op::Observe { .. })), 1);

    rc.emit(node, "clicks", PropValue::Int(4)).unwrap();
    rc.with_node::<Button, _>(node, |b| assert_eq!(b.description, "clicked 4"))
        .unwrap();
    // binding unchanged, so the re-render neither unobserved nor reobserved
    assert_eq!(log.count(|op| matches!(op, Op::Observe { .. })), 1);
    assert_eq!(log.count(|op| matches!(op, Op::Unobserve { .. })), 0);
    rc.with_node::<Button, _>(node, |b| assert_eq!(b.click_observers(), 1))
        .unwrap();
}

#[test]
fn custom_equality_suppresses_setter_renders() {
    thread_local! {
        static SET: RefCell<Option<SetState<String>>> = const { RefCell::new(None) };
    }
    let blind = component("CaseBlind", |_| {
        let (word, set_word) = use_state_eq(
            || "hi".to_owned(),
            |a: &String, b: &String| a.eq_ignore_ascii_case(b),
        )?;
        SET.with(|s| *s.borrow_mut() = Some(set_word));
        Ok(label(word))
    });
    let (node, rc) = render_fixed(blind.el(Props::new()), MemoryBackend::new()).unwrap();
    assert_eq!(rc.render_count(), 1);

    let set = SET.with(|s| s.borrow().clone()).unwrap();
    // equal under the custom equality: suppressed
    set.set("HI".to_owned()).unwrap();
    assert_eq!(rc.render_count(), 1);
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "hi"))
        .unwrap();

    set.set("bye".to_owned()).unwrap();
    assert_eq!(rc.render_count(), 2);
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "bye"))
        .unwrap();
}

#[test]
fn keyed_state_is_independent_of_call_order() {
    thread_local! {
        static SET: RefCell<Option<SetState<i64>>> = const { RefCell::new(None) };
    }
    let shifty = component("Shifty", |props| {
        if props.bool_of("extra").unwrap_or(false) {
            let _ = use_state(|| 100i64)?;
        }
        let (n, set_n) = use_state_keyed("count", || 0i64)?;
        SET.with(|s| *s.borrow_mut() = Some(set_n));
        Ok(label(format!("{n}")))
    });
    let (node, rc) = render_fixed(shifty.el(Props::new()), MemoryBackend::new()).unwrap();
    SET.with(|s| s.borrow().clone()).unwrap().set(7).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "7"))
        .unwrap();

    // an extra positional slot ahead of it does not disturb the keyed one
    rc.render(shifty.el(Props::new().with("extra", true))).unwrap();
    rc.with_node::<Label, _>(node, |l| assert_eq!(l.text, "7"))
        .unwrap();
}

#[test]
fn get_node_resolves_from_inside_an_effect() {
    thread_local! {
        static SEEN: Cell<Option<NodeId>> = const { Cell::new(None) };
    }
    let peek = component("Peek", |_| {
        let l = label("here");
        let el = l.clone();
        use_effect_deps(
            move || {
                SEEN.with(|s| s.set(get_node(&el).ok()));
                None
            },
            &(),
        )?;
        Ok(l)
    });
    let (node, rc) = render_fixed(peek.el(Props::new()), MemoryBackend::new()).unwrap();
    assert_eq!(SEEN.with(Cell::get), Some(node));

    // outside a pass there is no active context to resolve against
    let stray = label("stray");
    assert!(matches!(
        get_node(&stray).unwrap_err().kind(),
        RenderErrorKind::NoActiveRenderContext
    ));
    drop(rc);
}
