//! Compilation, file loading, and introspection queries.

use euslime::interpreter::Channel;

use super::test_helpers::Harness;

// ── Compilation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn compile_string_evaluates_region_and_lists_forms() {
    let mut h = Harness::start();
    h.send(
        r#"(:emacs-rex (swank:compile-string-for-emacs "(defun foo (x) x)\n(setq a 1)" "buf.l" (quote ((:position 1))) "/tmp/buf.l" nil) "USER" t 12)"#,
    )
    .await;
    let frames = h.recv_until_return(12).await;

    assert_eq!(frames[0], "(:read-string 0 1)");
    assert_eq!(frames[1], "(:read-aborted 0 1)");
    assert_eq!(frames[2], "(:write-string \"; Loaded (defun foo ...)\n\")");
    assert_eq!(frames[3], "(:write-string \"; Loaded (setq a ...)\n\")");
    let result = frames.last().unwrap();
    assert!(
        result.starts_with("(:return (:ok (:compilation-result nil t "),
        "{result}"
    );
    assert!(result.ends_with(" nil nil)) 12)"), "{result}");

    assert_eq!(
        *h.interpreter.evals.lock().unwrap(),
        vec!["(lisp:progn (defun foo (x) x)\n(setq a 1))".to_owned()]
    );
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn compile_string_rejects_unbalanced_source() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:compile-string-for-emacs "(defun foo" "buf.l" nil nil nil) "USER" t 13)"#)
        .await;
    let reply = h.recv().await;
    assert!(
        reply.starts_with(r#"(:return (:abort "malformed message: unterminated list"#),
        "{reply}"
    );
    assert!(h.interpreter.evals.lock().unwrap().is_empty());
    assert_eq!(h.session.gate().stats().waiting, 0);
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn compile_file_reports_success_without_evaluating() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:compile-file-for-emacs "/tmp/a.l" t) "USER" t 14)"#).await;
    assert_eq!(
        h.recv().await,
        r#"(:return (:ok (:compilation-result nil t 0.01 t "/tmp/a.l")) 14)"#
    );

    h.send(r#"(:emacs-rex (swank:compile-file-if-needed "/tmp/b.l" nil) "USER" t 15)"#).await;
    assert_eq!(
        h.recv().await,
        r#"(:return (:ok (:compilation-result nil t 0.01 nil "/tmp/b.l")) 15)"#
    );
    assert!(h.interpreter.evals.lock().unwrap().is_empty());
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn load_file_announces_and_loads_on_repl() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:load-file "/tmp/a.l") "USER" t 16)"#).await;
    let frames = h.recv_until_return(16).await;

    assert_eq!(
        frames,
        vec![
            "(:write-string \"Loading file: /tmp/a.l ...\n\")".to_owned(),
            "(:write-string \"Loaded.\n\")".to_owned(),
            "(:return (:ok t) 16)".to_owned(),
        ]
    );
    assert_eq!(
        *h.interpreter.execs.lock().unwrap(),
        vec![(r#"(lisp:load "/tmp/a.l")"#.to_owned(), Channel::Repl)]
    );
    h.finish().await.expect("clean shutdown");
}

// ── Session queries ───────────────────────────────────────────────────────────

#[tokio::test]
async fn connection_info_describes_backend() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:connection-info) nil t 1)"#).await;
    let reply = h.recv().await;

    assert!(reply.starts_with("(:return (:ok (:pid "), "{reply}");
    assert!(reply.contains(":style nil"), "{reply}");
    assert!(
        reply.contains(r#":encoding (:coding-systems ("utf-8-unix" "iso-latin-1-unix"))"#),
        "{reply}"
    );
    assert!(
        reply.contains(
            r#":lisp-implementation (:type "irteusgl" :name "irteusgl" :version "9.27" :program nil)"#
        ),
        "{reply}"
    );
    assert!(
        reply.contains(r#":package (:name "USER" :prompt "irteusgl")"#),
        "{reply}"
    );
    assert!(reply.ends_with(r#":version "2.20")) 1)"#), "{reply}");
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn create_repl_reports_prompt() {
    let mut h = Harness::start();
    h.interpreter.print("banner\n");
    h.send(r#"(:emacs-rex (swank-repl:create-repl nil :coding-system "utf-8-unix") "USER" t 2)"#)
        .await;
    assert_eq!(h.recv().await, r#"(:return (:ok ("USER" "irteusgl")) 2)"#);

    // Startup chatter buffered before the REPL existed is not replayed.
    h.send(r#"(:emacs-rex (swank:interactive-eval "1") "USER" t 3)"#).await;
    let frames = h.recv_until_return(3).await;
    assert!(frames.iter().all(|f| !f.contains("banner")), "{frames:?}");
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn set_package_updates_session() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:set-package "KEYWORD") "USER" t 4)"#).await;
    assert_eq!(h.recv().await, r#"(:return (:ok ("KEYWORD" "keyword")) 4)"#);
    assert_eq!(h.session.package().await.name, "KEYWORD");
    assert_eq!(
        h.interpreter.execs.lock().unwrap()[0],
        (r#"(slime::set-package "KEYWORD")"#.to_owned(), Channel::Repl)
    );
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn directory_queries() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:default-directory) "USER" t 5)"#).await;
    assert_eq!(h.recv().await, r#"(:return (:ok "/home/user/") 5)"#);

    h.send(r#"(:emacs-rex (swank:set-default-directory "/tmp") "USER" t 6)"#).await;
    assert_eq!(h.recv().await, r#"(:return (:ok "/tmp/") 6)"#);
    assert!(h
        .interpreter
        .exec_commands()
        .contains(&r#"(lisp:progn (lisp:cd "/tmp") (lisp:pwd))"#.to_owned()));
    h.finish().await.expect("clean shutdown");
}

// ── Documentation and completion ──────────────────────────────────────────────

#[tokio::test]
async fn autodoc_reports_arglist_at_cursor() {
    let mut h = Harness::start();
    h.send(
        r#"(:emacs-rex (swank:autodoc (quote ("defun" "" swank::%cursor-marker%)) :print-right-margin 80) "USER" t 7)"#,
    )
    .await;
    assert_eq!(
        h.recv().await,
        r#"(:return (:ok ("(defun name args &rest body)" nil)) 7)"#
    );
    assert_eq!(
        h.interpreter.exec_commands(),
        vec![r#"(slime::autodoc "defun" 2 (lisp:quote ("defun" "")))"#.to_owned()]
    );
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn autodoc_without_information_is_not_available() {
    let mut h = Harness::start();
    h.send(
        r#"(:emacs-rex (swank:autodoc (quote ("frob" swank::%cursor-marker%)) :print-right-margin 80) "USER" t 8)"#,
    )
    .await;
    assert_eq!(h.recv().await, "(:return (:ok (:not-available t)) 8)");

    // Cursor on the operator itself: nothing to look up.
    h.send(
        r#"(:emacs-rex (swank:autodoc (quote (swank::%cursor-marker%)) :print-right-margin 80) "USER" t 9)"#,
    )
    .await;
    assert_eq!(h.recv().await, "(:return (:ok (:not-available t)) 9)");
    assert_eq!(h.interpreter.exec_commands().len(), 1);
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn operator_arglist_returns_text() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:operator-arglist "defun" "USER") "USER" t 10)"#).await;
    assert_eq!(
        h.recv().await,
        r#"(:return (:ok "(defun name args &rest body)") 10)"#
    );
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn symbol_and_keyword_completion() {
    let mut h = Harness::start();
    h.send(r#"(:emacs-rex (swank:completions "li" "USER") "USER" t 11)"#).await;
    assert_eq!(
        h.recv().await,
        r#"(:return (:ok (("list" "list*") "list")) 11)"#
    );

    h.send(r#"(:emacs-rex (swank:completions ":te" "USER") "USER" t 12)"#).await;
    assert_eq!(h.recv().await, "(:return (:ok nil) 12)");

    h.send(
        r#"(:emacs-rex (swank:completions-for-keyword ":k" (quote ("make-instance" "" swank::%cursor-marker%))) "USER" t 13)"#,
    )
    .await;
    assert_eq!(h.recv().await, "(:return (:ok nil) 13)");

    assert_eq!(
        h.interpreter.exec_commands(),
        vec![
            r#"(slime::slime-find-symbol "li")"#.to_owned(),
            r#"(slime::slime-find-keyword ":te" (lisp:quote lisp:nil))"#.to_owned(),
            r#"(slime::slime-find-keyword ":k" (lisp:quote ("make-instance")))"#.to_owned(),
        ]
    );
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn describe_and_lookup_commands_are_forwarded() {
    let mut h = Harness::start();
    let requests = [
        r#"(swank:describe-symbol " car ")"#,
        r#"(swank:swank-expand-1 "(when a b)")"#,
        "(swank:list-all-package-names t)",
        r#"(swank:apropos-list-for-emacs "car" t nil (quote "LISP"))"#,
        r#"(swank:completions-for-character "Spa")"#,
        "(swank-repl:clear-repl-variables)",
    ];
    for (i, request) in requests.iter().enumerate() {
        let id = 20 + i64::try_from(i).unwrap();
        h.send(&format!(r#"(:emacs-rex {request} "USER" t {id})"#)).await;
        assert_eq!(h.recv().await, format!("(:return (:ok nil) {id})"), "{request}");
    }

    let execs = h.interpreter.execs.lock().unwrap().clone();
    assert_eq!(
        execs,
        vec![
            (r#"(slime::slime-describe-symbol "car")"#.to_owned(), Channel::Internal),
            ("(slime::slime-macroexpand (lisp:quote (when a b)))".to_owned(), Channel::Internal),
            ("(slime::slime-all-packages lisp:t)".to_owned(), Channel::Internal),
            (r#"(slime::slime-apropos-list "car" "LISP")"#.to_owned(), Channel::Internal),
            (r#"(slime::slime-find-character "Spa")"#.to_owned(), Channel::Internal),
            ("(slime::clear-repl-variables)".to_owned(), Channel::Repl),
        ]
    );
    h.finish().await.expect("clean shutdown");
}
