//! Scenario tests for the deployment pipeline.

mod common;

use serde_json::json;

use common::{client, hooks, item, obj, plain_data_extension, setup, type_name};
use metasync::core::{CancelToken, OutcomeKind, Phase};
use metasync::deploy::Deployer;
use metasync::reference::ReferenceResolver;
use metasync::selector::Selector;
use metasync::store::LocalStore;

#[tokio::test]
async fn dependencies_deploy_first_and_fresh_ids_resolve() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    store.write(&plain_data_extension("DE1")).unwrap();
    store
        .write(&item(
            "dataExtensionField",
            "DE1.email",
            &[
                ("CustomerKey", json!("DE1.email")),
                ("Name", json!("email")),
                ("FieldType", json!("EmailAddress")),
                ("r__dataExtension_key", json!("DE1")),
            ],
        ))
        .unwrap();

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector =
        Selector::types([type_name("dataExtension"), type_name("dataExtensionField")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "report: {report}");
    assert_eq!(report.total(OutcomeKind::Deployed), 2);

    // The extension was created before its field.
    let calls = client.calls();
    let de_create = calls.iter().position(|c| c == "create:dataExtension:DE1").unwrap();
    let field_create =
        calls.iter().position(|c| c == "create:dataExtensionField:DE1.email").unwrap();
    assert!(de_create < field_create);

    // The field's payload carries the extension's freshly assigned id.
    let de = client.remote_object(&type_name("dataExtension"), "DE1").unwrap();
    let de_id = de.get("ObjectID").unwrap();
    let field = client.remote_object(&type_name("dataExtensionField"), "DE1.email").unwrap();
    assert_eq!(field.get("DataExtensionObjectID").unwrap(), de_id);
}

#[tokio::test]
async fn one_failing_item_does_not_disturb_its_siblings() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    for key in ["DE1", "DE2", "DE3", "DE4"] {
        store.write(&plain_data_extension(key)).unwrap();
    }
    client.fail_validation_for("DE3");

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("dataExtension")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.total(OutcomeKind::Deployed), 3);
    assert_eq!(report.total(OutcomeKind::Failed), 1);
    assert_eq!(report.total(OutcomeKind::Blocked), 0);

    let failed = report
        .items_for(&type_name("dataExtension"))
        .iter()
        .find(|r| r.kind == OutcomeKind::Failed)
        .unwrap();
    assert_eq!(failed.key, "DE3");
    assert_eq!(failed.phase, Phase::Deploy);
}

#[tokio::test]
async fn unchanged_items_are_skipped_without_a_write() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    store.write(&plain_data_extension("DE1")).unwrap();
    client.seed(
        &type_name("dataExtension"),
        obj(&[("CustomerKey", json!("DE1")), ("Name", json!("DE1")), ("Description", json!("test"))]),
    );

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("dataExtension")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.total(OutcomeKind::Skipped), 1);
    assert!(client.calls().iter().all(|c| !c.starts_with("update:") && !c.starts_with("create:")));
}

#[tokio::test]
async fn changed_items_are_updated_in_place() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    store.write(&plain_data_extension("DE1")).unwrap();
    client.seed(
        &type_name("dataExtension"),
        obj(&[
            ("CustomerKey", json!("DE1")),
            ("Name", json!("Old Name")),
            ("Description", json!("test")),
        ]),
    );

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("dataExtension")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.total(OutcomeKind::Deployed), 1);
    assert!(client.calls().contains(&"update:dataExtension:DE1".to_string()));
    let remote = client.remote_object(&type_name("dataExtension"), "DE1").unwrap();
    assert_eq!(remote.get("Name").unwrap(), "DE1");
}

#[tokio::test]
async fn reference_only_changes_deploy_as_updates() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    let folder_a = client.seed(
        &type_name("folder"),
        obj(&[("Name", json!("Folder A")), ("ContentType", json!("dataextension"))]),
    );
    let folder_b = client.seed(
        &type_name("folder"),
        obj(&[("Name", json!("Folder B")), ("ContentType", json!("dataextension"))]),
    );
    client.seed(
        &type_name("dataExtension"),
        obj(&[
            ("CustomerKey", json!("DE1")),
            ("Name", json!("DE1")),
            ("Description", json!("test")),
            ("CategoryID", json!(folder_a)),
        ]),
    );

    // Identical to the remote copy except it moved to the other folder.
    store
        .write(&plain_data_extension("DE1").with_field("r__folder_key", json!("folder_b")))
        .unwrap();

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("dataExtension")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "report: {report}");
    assert_eq!(report.total(OutcomeKind::Deployed), 1);
    assert_eq!(report.total(OutcomeKind::Skipped), 0);
    assert!(client.calls().contains(&"update:dataExtension:DE1".to_string()));
    let remote = client.remote_object(&type_name("dataExtension"), "DE1").unwrap();
    assert_eq!(remote.get("CategoryID").unwrap(), &json!(folder_b));
}

#[tokio::test]
async fn unresolvable_hard_dependency_blocks_the_item_only() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    // The referenced extension exists neither remotely nor in this run.
    store
        .write(&item(
            "dataExtensionField",
            "orphan",
            &[
                ("CustomerKey", json!("orphan")),
                ("Name", json!("orphan")),
                ("r__dataExtension_key", json!("NOPE")),
            ],
        ))
        .unwrap();
    store
        .write(&item(
            "dataExtensionField",
            "loose",
            &[("CustomerKey", json!("loose")), ("Name", json!("loose"))],
        ))
        .unwrap();

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("dataExtensionField")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.total(OutcomeKind::Blocked), 1);
    assert_eq!(report.total(OutcomeKind::Deployed), 1);
    let blocked = report
        .items_for(&type_name("dataExtensionField"))
        .iter()
        .find(|r| r.kind == OutcomeKind::Blocked)
        .unwrap();
    assert!(blocked.message.as_deref().unwrap().contains("r__dataExtension_key"));
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    store.write(&plain_data_extension("DE1")).unwrap();
    client.fail_transient_for("DE1", 1);

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("dataExtension")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "report: {report}");
    assert_eq!(report.total(OutcomeKind::Deployed), 1);
}

#[tokio::test]
async fn soft_referenced_items_deploy_in_a_deferred_pass() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    store
        .write(&item(
            "automation",
            "nightly",
            &[
                ("key", json!("nightly")),
                ("name", json!("Nightly")),
                ("r__triggeredSend_key", json!("welcome-ts")),
            ],
        ))
        .unwrap();
    store
        .write(&item(
            "triggeredSend",
            "welcome-ts",
            &[("CustomerKey", json!("welcome-ts")), ("Name", json!("Welcome TS"))],
        ))
        .unwrap();

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("automation"), type_name("triggeredSend")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "report: {report}");
    assert_eq!(report.total(OutcomeKind::Deployed), 2);

    // The automation waited for the triggered send it references.
    let calls = client.calls();
    let ts = calls.iter().position(|c| c == "create:triggeredSend:welcome-ts").unwrap();
    let auto = calls.iter().position(|c| c == "create:automation:nightly").unwrap();
    assert!(ts < auto);

    // And its payload carries the triggered send's fresh id.
    let ts_obj = client.remote_object(&type_name("triggeredSend"), "welcome-ts").unwrap();
    let ts_id = ts_obj.get("ObjectID").unwrap();
    let auto_obj = client.remote_object(&type_name("automation"), "nightly").unwrap();
    assert_eq!(auto_obj.get("triggeredSendId").unwrap(), ts_id);
}

#[tokio::test]
async fn soft_references_resolve_against_existing_remote_objects() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    // The triggered send is not part of the run; it already exists in
    // the target environment.
    let ts_id = client.seed(
        &type_name("triggeredSend"),
        obj(&[("CustomerKey", json!("welcome-ts")), ("Name", json!("Welcome TS"))]),
    );
    store
        .write(&item(
            "automation",
            "nightly",
            &[
                ("key", json!("nightly")),
                ("name", json!("Nightly")),
                ("r__triggeredSend_key", json!("welcome-ts")),
            ],
        ))
        .unwrap();

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("automation")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "report: {report}");
    assert_eq!(report.total(OutcomeKind::Deployed), 1);
    let auto = client.remote_object(&type_name("automation"), "nightly").unwrap();
    assert_eq!(auto.get("triggeredSendId").unwrap(), &json!(ts_id));
}

#[tokio::test]
async fn extracted_code_is_remerged_before_the_write() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);

    store
        .write(&item(
            "script",
            "loader",
            &[
                ("key", json!("loader")),
                ("name", json!("Loader")),
                ("script", json!("file://loader.ssjs")),
            ],
        ))
        .unwrap();
    store
        .write_text(&type_name("script"), "loader", "ssjs", "Platform.Load(\"core\", \"1\")")
        .unwrap();

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("script")]);
    let (_deployed, report) = deployer
        .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.is_success(), "report: {report}");
    let remote = client.remote_object(&type_name("script"), "loader").unwrap();
    assert_eq!(remote.get("script").unwrap(), "Platform.Load(\"core\", \"1\")");
}

#[tokio::test]
async fn cancelled_runs_issue_no_writes() {
    let (registry, store) = setup();
    let hooks = hooks(&registry);
    let client = client(&registry);
    store.write(&plain_data_extension("DE1")).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();

    let resolver = ReferenceResolver::new(&registry);
    let deployer = Deployer::new(&registry, &hooks);
    let selector = Selector::types([type_name("dataExtension")]);
    let (deployed, _report) =
        deployer.deploy(&client, &store, &resolver, &selector, &cancel).await.unwrap();

    assert!(deployed.is_empty());
    assert!(client.calls().iter().all(|c| !c.starts_with("create:") && !c.starts_with("update:")));
}
