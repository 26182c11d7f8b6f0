//! Debugger restart flows: QUIT, CONTINUE, RESTART, and unwinding from the REPL.

use euslime::engine::session::SessionSettings;
use euslime::InterpreterError;

use super::test_helpers::{EvalReply, Harness, ScriptedInterpreter};

/// Run a failing evaluation as request `id` and consume its debugger entry.
async fn fail(h: &mut Harness, id: i64, message: &'static str) {
    h.interpreter
        .script(EvalReply::Error(InterpreterError::new(message, vec!["(eval)".into()])));
    h.send(&format!(
        r#"(:emacs-rex (swank:interactive-eval "(fail {id})") "USER" t {id})"#
    ))
    .await;
    assert_eq!(h.recv().await, "(:read-string 0 1)");
    assert_eq!(h.recv().await, "(:read-aborted 0 1)");
    let debug = h.recv().await;
    assert!(debug.starts_with("(:debug 0 "), "{debug}");
    assert!(debug.ends_with(&format!("({id}))")), "{debug}");
    let activate = h.recv().await;
    assert!(activate.starts_with("(:debug-activate 0 "), "{activate}");
}

fn owned(frames: &[&str]) -> Vec<String> {
    frames.iter().map(|f| (*f).to_owned()).collect()
}

/// QUIT resets in place: no relaunch, and the next evaluation succeeds.
async fn assert_quit_kept_process(h: &mut Harness, id: i64) {
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.stops), 0);
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.starts), 0);

    h.send(&format!(
        r#"(:emacs-rex (swank:interactive-eval "(+ 1 2)") "USER" t {id})"#
    ))
    .await;
    let frames = h.recv_until_return(id).await;
    assert_eq!(
        frames,
        vec![
            "(:read-string 0 1)".to_owned(),
            "(:read-aborted 0 1)".to_owned(),
            r#"(:new-package "USER" "irteusgl")"#.to_owned(),
            format!("(:return (:ok nil) {id})"),
        ]
    );
}

#[tokio::test]
async fn quit_answers_pending_request_after_restart_reply() {
    let mut h = Harness::start();
    fail(&mut h, 3, "boom in (error \"boom\")").await;

    h.send(r#"(:emacs-rex (swank:invoke-nth-restart-for-emacs 1 0) "USER" t 4)"#).await;
    let frames = h.recv_until_return(3).await;

    assert_eq!(
        frames,
        owned(&[
            "(:debug-return 0 1 nil)",
            r#"(:return (:abort "NIL") 4)"#,
            r#"(:new-package "USER" "irteusgl")"#,
            r#"(:return (:abort "boom") 3)"#,
        ])
    );
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.resets), 1);
    assert_eq!(h.session.debugger_depth().await, 0);
    assert_quit_kept_process(&mut h, 7).await;
    h.finish().await.expect("clean shutdown");
}

/// QUIT on the innermost of two levels answers both pending requests.
#[tokio::test]
async fn quit_at_depth_two_clears_every_level() {
    let mut h = Harness::start();
    fail(&mut h, 3, "first failure").await;
    fail(&mut h, 5, "second failure in (eval)").await;
    assert_eq!(h.session.debugger_depth().await, 2);

    h.send(r#"(:emacs-rex (swank:invoke-nth-restart-for-emacs 2 0) "USER" t 6)"#).await;
    let frames = h.recv_until_return(3).await;

    assert_eq!(
        frames,
        owned(&[
            "(:debug-return 0 2 nil)",
            r#"(:return (:abort "NIL") 6)"#,
            r#"(:new-package "USER" "irteusgl")"#,
            r#"(:return (:abort "second failure") 5)"#,
            "(:debug-return 0 1 nil)",
            r#"(:return (:abort "first failure") 3)"#,
        ])
    );
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.resets), 1);
    assert_eq!(h.session.debugger_depth().await, 0);
    assert_quit_kept_process(&mut h, 8).await;
    h.finish().await.expect("clean shutdown");
}

/// CONTINUE on an outer level unwinds the deeper ones first.
#[tokio::test]
async fn continue_unwinds_levels_above() {
    let mut h = Harness::start();
    fail(&mut h, 3, "outer").await;
    fail(&mut h, 5, "inner").await;

    h.send(r#"(:emacs-rex (swank:invoke-nth-restart-for-emacs 1 1) "USER" t 6)"#).await;
    let frames = h.recv_until_return(3).await;

    assert_eq!(
        frames,
        owned(&[
            "(:debug-return 0 2 nil)",
            r#"(:return (:abort "inner") 5)"#,
            "(:debug-return 0 1 nil)",
            r#"(:return (:abort "NIL") 6)"#,
            r#"(:new-package "USER" "irteusgl")"#,
            r#"(:return (:abort "outer") 3)"#,
        ])
    );
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.resets), 0);
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.stops), 0);
    h.finish().await.expect("clean shutdown");
}

/// CONTINUE on the innermost level keeps the outer one active.
#[tokio::test]
async fn continue_keeps_outer_level() {
    let mut h = Harness::start();
    fail(&mut h, 3, "outer").await;
    fail(&mut h, 5, "inner").await;

    h.send(r#"(:emacs-rex (swank:invoke-nth-restart-for-emacs 2 1) "USER" t 6)"#).await;
    let frames = h.recv_until_return(5).await;
    assert_eq!(frames.last().unwrap(), r#"(:return (:abort "inner") 5)"#);
    assert_eq!(h.session.debugger_depth().await, 1);
    h.finish().await.expect("clean shutdown");
}

/// RESTART relaunches the interpreter exactly once and drops stale output.
#[tokio::test]
async fn restart_relaunches_interpreter_once() {
    let mut h = Harness::start();
    fail(&mut h, 3, "boom").await;
    h.interpreter.print("stale output\n");

    h.send(r#"(:emacs-rex (swank:invoke-nth-restart-for-emacs 1 2) "USER" t 4)"#).await;
    let frames = h.recv_until_return(3).await;
    assert_eq!(frames.first().unwrap(), "(:debug-return 0 1 nil)");
    assert_eq!(frames.last().unwrap(), r#"(:return (:abort "boom") 3)"#);
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.stops), 1);
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.starts), 1);
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.resets), 0);

    h.send(r#"(:emacs-rex (swank:interactive-eval "1") "USER" t 5)"#).await;
    let frames = h.recv_until_return(5).await;
    assert!(frames.iter().all(|f| !f.contains("stale")), "{frames:?}");
    h.finish().await.expect("clean shutdown");
}

/// A fatal level offers only RESTART, at index 0.
#[tokio::test]
async fn fatal_level_restart_at_index_zero() {
    let mut h = Harness::start();
    h.interpreter.script(EvalReply::Error(InterpreterError::fatal(
        "segmentation fault",
        Vec::new(),
    )));
    h.send(r#"(:emacs-rex (swank:interactive-eval "(crash)") "USER" t 3)"#).await;
    assert_eq!(h.recv().await, "(:read-string 0 1)");
    assert_eq!(h.recv().await, "(:read-aborted 0 1)");
    assert_eq!(
        h.recv().await,
        r#"(:debug 0 1 ("segmentation fault" "" nil) (("RESTART" "Restart euslisp process")) nil (3))"#
    );
    assert_eq!(h.recv().await, "(:debug-activate 0 1 nil)");

    h.send(r#"(:emacs-rex (swank:invoke-nth-restart-for-emacs 1 0) "USER" t 4)"#).await;
    let frames = h.recv_until_return(3).await;
    assert_eq!(frames.last().unwrap(), r#"(:return (:abort "segmentation fault") 3)"#);
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.stops), 1);
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.starts), 1);
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.resets), 0);
    h.finish().await.expect("clean shutdown");
}

/// Typing at the REPL while the debugger is open unwinds instead of evaluating.
#[tokio::test]
async fn listener_eval_in_debugger_throws_to_toplevel() {
    let mut h = Harness::start();
    fail(&mut h, 3, "boom").await;

    h.send(r#"(:emacs-rex (swank-repl:listener-eval "(+ 1 1)") "USER" :repl-thread 4)"#)
        .await;
    let frames = h.recv_until_return(3).await;

    assert_eq!(
        frames,
        owned(&[
            "(:debug-return 0 1 nil)",
            r#"(:return (:abort "NIL") 4)"#,
            r#"(:new-package "USER" "irteusgl")"#,
            r#"(:return (:abort "boom") 3)"#,
        ])
    );
    assert_eq!(h.interpreter.evals.lock().unwrap().len(), 1);

    let stats = h.session.gate().stats();
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.waiting, 0);
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn throw_to_toplevel_resolves_innermost_level() {
    let mut h = Harness::start();
    fail(&mut h, 3, "outer").await;
    fail(&mut h, 5, "inner").await;

    h.send(r#"(:emacs-rex (swank:throw-to-toplevel) "USER" t 6)"#).await;
    let frames = h.recv_until_return(3).await;
    assert_eq!(frames[0], "(:debug-return 0 2 nil)");
    assert_eq!(frames[1], r#"(:return (:abort "NIL") 6)"#);
    assert_eq!(h.session.debugger_depth().await, 0);
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn throw_to_toplevel_outside_debugger_is_ok_nil() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:throw-to-toplevel) "USER" t 9)"#).await;
    assert_eq!(h.recv().await, "(:return (:ok nil) 9)");
    assert_eq!(ScriptedInterpreter::count(&h.interpreter.resets), 0);
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn restart_on_inactive_level_is_an_error_result() {
    let mut h = Harness::start();
    fail(&mut h, 3, "boom").await;

    h.send(r#"(:emacs-rex (swank:invoke-nth-restart-for-emacs 3 0) "USER" t 7)"#).await;
    assert_eq!(
        h.recv().await,
        r#"(:return (:abort "malformed message: no debugger level 3 is active") 7)"#
    );
    assert_eq!(h.session.debugger_depth().await, 1);
    h.finish().await.expect("clean shutdown");
}

/// Backtrace reads the live call stack while the debugger is open.
#[tokio::test]
async fn backtrace_numbers_frames_from_start() {
    let mut h = Harness::start();
    fail(&mut h, 3, "boom").await;

    h.send(r#"(:emacs-rex (swank:backtrace 1 3) "USER" 0 4)"#).await;
    assert_eq!(
        h.recv().await,
        r#"(:return (:ok ((1 "frame-1") (2 "frame-2"))) 4)"#
    );

    h.send(r#"(:emacs-rex (swank:backtrace 0 nil) "USER" 0 5)"#).await;
    let reply = h.recv().await;
    assert!(reply.contains(r#"(4 "frame-4")"#), "{reply}");
    h.finish().await.expect("clean shutdown");
}

/// Without an end index the configured depth bounds the fetched stack.
#[tokio::test]
async fn backtrace_without_end_uses_configured_depth() {
    let mut h = Harness::start_with(SessionSettings {
        backtrace_depth: 2,
        ..SessionSettings::default()
    });
    fail(&mut h, 3, "boom").await;

    h.send(r#"(:emacs-rex (swank:backtrace 0 nil) "USER" 0 4)"#).await;
    assert_eq!(
        h.recv().await,
        r#"(:return (:ok ((0 "frame-0") (1 "frame-1"))) 4)"#
    );
    h.finish().await.expect("clean shutdown");
}
