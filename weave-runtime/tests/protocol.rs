//! The call protocol of woven code, written out by hand: resolve once,
//! snapshot, apply overrides, run guarded, report, re-raise. Hooks run
//! inside `in_hook`.
//!
//! Run with: cargo test -p weave-runtime --test protocol

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use weave_runtime::{
    Arg, Call, DiagnosticKind, HookSlot, Hooks, Outcome, Override, Returned, Target,
};

static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static RESOLVED: AtomicUsize = AtomicUsize::new(0);
static DIAGNOSTICS: Mutex<Vec<DiagnosticKind>> = Mutex::new(Vec::new());

fn record(event: String) {
    EVENTS.lock().unwrap().push(event);
}

fn resolve(_class: Option<&'static str>, function: &'static str) -> Option<Hooks> {
    RESOLVED.fetch_add(1, Ordering::SeqCst);
    let post = |call: &Call, outcome: &Outcome<'_>| -> Option<Box<dyn std::any::Any + Send>> {
        if let Some(name) = call.arg("name") {
            record(format!("{} saw {}", call.function, name.rendered.as_deref().unwrap_or("?")));
        }
        match (&outcome.returned, outcome.panic_message()) {
            (_, Some(message)) => record(format!("{} panicked: {message}", call.function)),
            (Some(r), None) => record(format!(
                "{} -> {}",
                call.function,
                r.rendered.as_deref().unwrap_or("?")
            )),
            (None, None) => record(format!("{} done", call.function)),
        }
        // Double whatever `greet` returns.
        outcome
            .returned
            .as_ref()
            .and_then(|r| r.value)
            .and_then(|v| v.downcast_ref::<String>())
            .map(|s| Box::new(format!("{s}{s}")) as Box<dyn std::any::Any + Send>)
    };
    match function {
        "greet" => Some(
            Hooks::new()
                .with_pre(|_| {
                    vec![
                        Override::new("name", String::from("weave")),
                        Override::new(5usize, 0u8),
                    ]
                })
                .with_post(post),
        ),
        _ => Some(Hooks::new().with_post(post)),
    }
}

/// `fn greet(name: String) -> String { format!("hi {name}") }`, woven.
fn greet(mut name: String) -> String {
    static __WEAVE_HOOKS: HookSlot = HookSlot::new();
    let __weave_hooks = __WEAVE_HOOKS.get_or_resolve(|| resolve(None, "greet"));
    let snapshot = |name: &String| {
        vec![Arg::new(
            0,
            "name",
            std::any::type_name_of_val(name),
            weave_runtime::render!(name),
        )]
    };
    let mut __weave_call = __weave_hooks.is_active().then(|| {
        weave_runtime::in_hook(|| Call {
            target: Target::None,
            args: snapshot(&name),
            class: None,
            function: "greet",
            file: file!(),
            line: line!(),
        })
    });
    if let (Some(__weave_pre), Some(__weave_call)) = (&__weave_hooks.pre, &mut __weave_call) {
        let mut overridden = false;
        for Override { key, value } in weave_runtime::in_hook(|| __weave_pre(&*__weave_call)) {
            match key.position(&["name"]) {
                Some(0) => match value.downcast::<String>() {
                    Ok(new) => {
                        name = *new;
                        overridden = true;
                    }
                    Err(_) => weave_runtime::mismatched_argument(__weave_call, &key),
                },
                _ => weave_runtime::unexpected_argument(__weave_call, &key),
            }
        }
        if overridden {
            __weave_call.args = weave_runtime::in_hook(|| snapshot(&name));
        }
    }
    let __weave_result = weave_runtime::guarded::<String, _>(|| format!("hi {name}"));
    match __weave_result {
        Ok(mut ret) => {
            if let (Some(post), Some(call)) = (&__weave_hooks.post, &__weave_call) {
                let replacement = weave_runtime::in_hook(|| {
                    post(
                        call,
                        &Outcome::returned(Returned {
                            type_name: std::any::type_name_of_val(&ret),
                            rendered: weave_runtime::render!(ret),
                            value: Some(&ret),
                        }),
                    )
                });
                if let Some(replacement) = replacement {
                    match replacement.downcast::<String>() {
                        Ok(new) => ret = *new,
                        Err(_) => weave_runtime::mismatched_return(call),
                    }
                }
            }
            ret
        }
        Err(payload) => {
            if let (Some(post), Some(call)) = (&__weave_hooks.post, &__weave_call) {
                let _ = weave_runtime::in_hook(|| post(call, &Outcome::panicked(&*payload)));
            }
            std::panic::resume_unwind(payload)
        }
    }
}

/// `fn fail(depth: u32) { if depth > 0 { panic!(..) } }`, woven.
fn fail(depth: u32) {
    static __WEAVE_HOOKS: HookSlot = HookSlot::new();
    let __weave_hooks = __WEAVE_HOOKS.get_or_resolve(|| resolve(None, "fail"));
    let __weave_call = __weave_hooks.is_active().then(|| {
        weave_runtime::in_hook(|| Call {
            target: Target::None,
            args: vec![Arg::new(0, "depth", "u32", weave_runtime::render!(depth))],
            class: None,
            function: "fail",
            file: file!(),
            line: line!(),
        })
    });
    let __weave_result = weave_runtime::guarded::<(), _>(|| {
        if depth > 0 {
            panic!("too deep: {depth}");
        }
    });
    match __weave_result {
        Ok(()) => {
            if let (Some(post), Some(call)) = (&__weave_hooks.post, &__weave_call) {
                let _ = weave_runtime::in_hook(|| post(call, &Outcome::completed()));
            }
        }
        Err(payload) => {
            if let (Some(post), Some(call)) = (&__weave_hooks.post, &__weave_call) {
                let _ = weave_runtime::in_hook(|| post(call, &Outcome::panicked(&*payload)));
            }
            std::panic::resume_unwind(payload)
        }
    }
}

#[test]
fn woven_calls_follow_the_protocol() {
    weave_runtime::set_diagnostic_handler(|d| DIAGNOSTICS.lock().unwrap().push(d.kind));

    assert_eq!(greet(String::from("you")), "hi weavehi weave");
    assert_eq!(greet(String::from("again")), "hi weavehi weave");

    fail(0);
    let caught = std::panic::catch_unwind(|| fail(2));
    let payload = caught.unwrap_err();
    assert_eq!(weave_runtime::panic_message(&*payload), Some("too deep: 2"));

    weave_runtime::reset_diagnostic_handler();

    // One resolution per function, no matter how many calls.
    assert_eq!(RESOLVED.load(Ordering::SeqCst), 2);
    // Key 5 matches no parameter: one diagnostic per call, nothing else.
    assert_eq!(
        *DIAGNOSTICS.lock().unwrap(),
        [
            DiagnosticKind::UnexpectedArgument,
            DiagnosticKind::UnexpectedArgument
        ]
    );
    assert_eq!(
        *EVENTS.lock().unwrap(),
        [
            "greet saw \"weave\"",
            "greet -> \"hi weave\"",
            "greet saw \"weave\"",
            "greet -> \"hi weave\"",
            "fail done",
            "fail panicked: too deep: 2",
        ]
    );
}

static PINGS: AtomicUsize = AtomicUsize::new(0);

/// `fn ping() -> u32 { 1 }`, woven, with a post hook that calls `ping`
/// again.
fn ping() -> u32 {
    static __WEAVE_HOOKS: HookSlot = HookSlot::new();
    let __weave_hooks = __WEAVE_HOOKS.get_or_resolve(|| {
        Some(Hooks::new().with_post(|_, _| {
            PINGS.fetch_add(1, Ordering::SeqCst);
            ping();
            None
        }))
    });
    let __weave_call = __weave_hooks.is_active().then(|| {
        weave_runtime::in_hook(|| Call {
            target: Target::None,
            args: Vec::new(),
            class: None,
            function: "ping",
            file: file!(),
            line: line!(),
        })
    });
    let ret = weave_runtime::guarded::<u32, _>(|| 1).unwrap_or(0);
    if let (Some(post), Some(call)) = (&__weave_hooks.post, &__weave_call) {
        let _ = weave_runtime::in_hook(|| post(call, &Outcome::completed()));
    }
    ret
}

#[test]
fn hooks_do_not_reenter_woven_code() {
    assert_eq!(ping(), 1);
    assert_eq!(ping(), 1);
    assert_eq!(PINGS.load(Ordering::SeqCst), 2);
    assert!(!weave_runtime::is_in_hook());
}
