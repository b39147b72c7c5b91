//! Render/consolidate behavior observed through the operation log: what
//! gets created, what gets written, and what a no-op pass costs.

use trellis_core::{
    component, render, render_fixed, Component, Element, Props, PropValue, RenderContext,
    RenderErrorKind,
};
use trellis_testing::{recording_memory, Op};
use trellis_widgets::{column, label, label_type, Column, MemoryBackend};

fn names(values: &[&str]) -> PropValue {
    PropValue::List(
        values
            .iter()
            .map(|value| PropValue::Str((*value).to_owned()))
            .collect(),
    )
}

fn list_component() -> trellis_core::FunctionComponent {
    component("List", |props| {
        let names: Vec<String> = props
            .get("names")
            .and_then(PropValue::as_list)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|value| value.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        column().nest(move || {
            for name in &names {
                let _ = label(name.clone()).key(name.clone());
            }
        })
    })
}

#[test]
fn renders_into_container() {
    let hello = component("Hello", |_| Ok(label("hi")));
    let (backend, log) = recording_memory();
    let (container, rc) = render(hello.el(Props::new()), backend).unwrap();
    assert_eq!(
        log.take(),
        vec![
            Op::CreateContainer { id: container },
            Op::Create {
                id: 1,
                type_name: "Label"
            },
            Op::SetProp {
                id: container,
                name: "children".to_owned()
            },
        ]
    );
    rc.with_node::<trellis_widgets::Label, _>(1, |l| assert_eq!(l.text, "hi"))
        .unwrap();
}

#[test]
fn rerender_without_changes_is_zero_ops() {
    let hello = component("Hello", |_| Ok(label("hi")));
    let (backend, log) = recording_memory();
    let (_, rc) = render(hello.el(Props::new()), backend).unwrap();
    log.clear();
    rc.render(hello.el(Props::new())).unwrap();
    assert!(log.is_empty(), "no-op pass produced {:?}", log.take());
}

#[test]
fn prop_change_writes_only_that_prop() {
    let greet = component("Greet", |props| {
        Ok(label(props.str_of("name").unwrap_or("?").to_owned()))
    });
    let (backend, log) = recording_memory();
    let (node, rc) = render_fixed(greet.el(Props::new().with("name", "ada")), backend).unwrap();
    log.clear();
    rc.render(greet.el(Props::new().with("name", "grace"))).unwrap();
    assert_eq!(
        log.take(),
        vec![
            Op::BeginBatch { id: node },
            Op::SetProp {
                id: node,
                name: "text".to_owned()
            },
            Op::EndBatch { id: node },
        ]
    );
    rc.with_node::<trellis_widgets::Label, _>(node, |l| assert_eq!(l.text, "grace"))
        .unwrap();
}

#[test]
fn dropped_prop_resets_to_declared_default() {
    let maybe_text = component("MaybeText", |props| {
        let mut kwargs = Props::new();
        if let Some(text) = props.str_of("text") {
            kwargs = kwargs.with("text", text.to_owned());
        }
        Ok(Element::new(Component::Native(label_type()), kwargs))
    });
    let (backend, log) = recording_memory();
    let (node, rc) =
        render_fixed(maybe_text.el(Props::new().with("text", "hi")), backend).unwrap();
    rc.with_node::<trellis_widgets::Label, _>(node, |l| assert_eq!(l.text, "hi"))
        .unwrap();
    log.clear();

    rc.render(maybe_text.el(Props::new())).unwrap();
    assert_eq!(log.set_props(Some("text")), 1);
    rc.with_node::<trellis_widgets::Label, _>(node, |l| assert_eq!(l.text, ""))
        .unwrap();

    // and the reset itself is not rewritten on the next pass
    log.clear();
    rc.render(maybe_text.el(Props::new())).unwrap();
    assert!(log.is_empty(), "no-op pass produced {:?}", log.take());
}

#[test]
fn keyed_reorder_moves_nodes_without_recreating() {
    let list = list_component();
    let (backend, log) = recording_memory();
    let (node, rc) =
        render_fixed(list.el(Props::new().with("names", names(&["a", "b", "c"]))), backend)
            .unwrap();
    let first = rc
        .with_node::<Column, _>(node, |c| c.children.clone())
        .unwrap();
    assert_eq!(first.len(), 3);
    log.clear();
    rc.render(list.el(Props::new().with("names", names(&["c", "b", "a"]))))
        .unwrap();
    assert_eq!(log.creates(), 0);
    assert_eq!(log.closes(), 0);
    let second = rc
        .with_node::<Column, _>(node, |c| c.children.clone())
        .unwrap();
    let reversed: Vec<_> = first.iter().rev().copied().collect();
    assert_eq!(second, reversed);
}

#[test]
fn removing_a_child_closes_its_node() {
    let list = list_component();
    let (backend, log) = recording_memory();
    let (node, rc) =
        render_fixed(list.el(Props::new().with("names", names(&["a", "b"]))), backend).unwrap();
    log.clear();
    rc.render(list.el(Props::new().with("names", names(&["a"]))))
        .unwrap();
    assert_eq!(log.closes(), 1);
    assert_eq!(log.creates(), 0);
    let children = rc
        .with_node::<Column, _>(node, |c| c.children.clone())
        .unwrap();
    assert_eq!(children.len(), 1);
}

#[test]
fn adding_a_child_creates_only_it() {
    let list = list_component();
    let (backend, log) = recording_memory();
    let (node, rc) =
        render_fixed(list.el(Props::new().with("names", names(&["a"]))), backend).unwrap();
    log.clear();
    rc.render(list.el(Props::new().with("names", names(&["a", "b"]))))
        .unwrap();
    assert_eq!(log.creates(), 1);
    assert_eq!(log.closes(), 0);
    let children = rc
        .with_node::<Column, _>(node, |c| c.children.clone())
        .unwrap();
    assert_eq!(children.len(), 2);
}

#[test]
fn duplicate_keys_collide() {
    let dup = component("Dup", |_| {
        column().nest(|| {
            let _ = label("x").key("k");
            let _ = label("y").key("k");
        })
    });
    let err = render_fixed(dup.el(Props::new()), MemoryBackend::new()).unwrap_err();
    assert!(matches!(
        err.kind(),
        RenderErrorKind::KeyCollision { key } if key == "k"
    ));
}

#[test]
fn same_key_type_change_replaces_node() {
    let swap = component("Swap", |props| {
        let to_button = props.bool_of("button").unwrap_or(false);
        column().nest(move || {
            if to_button {
                let _ = trellis_widgets::button("b").key("slot");
            } else {
                let _ = label("l").key("slot");
            }
        })
    });
    let (backend, log) = recording_memory();
    let (_, rc) = render_fixed(swap.el(Props::new().with("button", false)), backend).unwrap();
    log.clear();
    rc.render(swap.el(Props::new().with("button", true))).unwrap();
    assert_eq!(log.closes(), 1);
    assert_eq!(log.creates(), 1);
}

#[test]
fn root_node_change_needs_a_container() {
    let swap = component("RootSwap", |props| {
        if props.bool_of("button").unwrap_or(false) {
            Ok(trellis_widgets::button("b"))
        } else {
            Ok(label("l"))
        }
    });

    // without a container the root must keep producing the same node
    let (fixed_rc_node, fixed_rc) = render_fixed(
        swap.el(Props::new().with("button", false)),
        MemoryBackend::new(),
    )
    .unwrap();
    let _ = fixed_rc_node;
    let err = fixed_rc
        .render(swap.el(Props::new().with("button", true)))
        .unwrap_err();
    assert!(matches!(err.kind(), RenderErrorKind::RootNodeTypeChanged));

    // with a container the swap is just a children update
    let (backend, log) = recording_memory();
    let (container, rc) = render(swap.el(Props::new().with("button", false)), backend).unwrap();
    log.clear();
    rc.render(swap.el(Props::new().with("button", true))).unwrap();
    assert_eq!(log.creates(), 1);
    assert_eq!(log.closes(), 1);
    assert_eq!(log.set_props(Some("children")), 1);
    let _ = container;
}

#[test]
fn shared_element_consolidates_once() {
    let shared = component("Shared", |_| {
        let l = label("s");
        Ok(Element::new(
            Component::Native(trellis_widgets::column_type()),
            Props::new().with(
                "children",
                PropValue::List(vec![
                    PropValue::Element(l.clone()),
                    PropValue::Element(l),
                ]),
            ),
        ))
    });
    let (backend, log) = recording_memory();
    let (node, rc) = render_fixed(shared.el(Props::new()), backend).unwrap();
    assert_eq!(log.creates(), 2); // one label, one column
    let children = rc
        .with_node::<Column, _>(node, |c| c.children.clone())
        .unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0], children[1]);
}

#[test]
fn native_elements_reject_positional_args() {
    let bad = component("Bad", |_| {
        Ok(Element::new(
            Component::Native(label_type()),
            Props::new().arg(1i64),
        ))
    });
    let err = render_fixed(bad.el(Props::new()), MemoryBackend::new()).unwrap_err();
    assert!(matches!(
        err.kind(),
        RenderErrorKind::NativeElementArgs { .. }
    ));
}

#[test]
fn nest_outside_a_render_pass_fails() {
    let err = column().nest(|| {}).unwrap_err();
    assert!(matches!(err.kind(), RenderErrorKind::NoActiveRenderContext));
}

#[test]
fn rerender_reuses_context_for_same_component() {
    let greet = component("Greet", |props| {
        Ok(label(props.str_of("name").unwrap_or("?").to_owned()))
    });
    let rc = RenderContext::new(MemoryBackend::new());
    let first = rc
        .render(greet.el(Props::new().with("name", "x")))
        .unwrap()
        .unwrap();
    let second = rc
        .render(greet.el(Props::new().with("name", "y")))
        .unwrap()
        .unwrap();
    assert_eq!(first, second);
}
