//! End-to-end scenarios driving the full stack: interaction call ->
//! journal + storage ops -> mutation batch -> scheduler -> incremental
//! recomputation -> stored state.
//!
//! Each test builds a fresh controller over an in-memory store (one test
//! repeats the flow over SQLite to pin backend parity).

use serde_json::{json, Value};

use deriva_core::computation::{
    AsyncReturnFn, CollectArgsFn, Computed, Count, ExternalComputation, StateMachine, StateNode,
    StateTransfer, TargetFn, Trigger,
};
use deriva_core::id::RecordId;
use deriva_core::record::Fields;
use deriva_core::schema::{
    Cardinality, Entity, Property, PropertyType, Relation, RelationSide, SchemaRegistry,
    INTERACTION_RECORD, TASK_RECORD,
};
use deriva_engine::tasks::STATUS_SUCCESS;
use deriva_runtime::{
    Controller, EffectFn, GuardFn, Interaction, InteractionArgs, LinkSpec, RuntimeError,
    StorageOp,
};
use deriva_storage::{InMemoryStore, MatchExpr, RecordStore, SqliteStore};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn fields(pairs: &[(&str, Value)]) -> Fields {
    let mut f = Fields::new();
    for (name, value) in pairs {
        f.insert((*name).to_string(), value.clone());
    }
    f
}

fn payload_id(payload: &Value, key: &str) -> Result<RecordId, String> {
    payload
        .get(key)
        .and_then(Value::as_i64)
        .map(RecordId)
        .ok_or_else(|| format!("payload missing '{key}'"))
}

/// Target selector reading `payload.post` from the interaction journal
/// record.
fn post_target() -> TargetFn {
    TargetFn::new(|event| {
        event
            .record
            .as_ref()
            .and_then(|r| r.get("payload"))
            .and_then(|p| p.get("post"))
            .and_then(Value::as_i64)
            .map(RecordId)
    })
}

/// Post lifecycle: normal -> draft -> normal -> published -> normal.
fn post_status_machine() -> StateMachine {
    let transfer = |current: &str, next: &str, interaction: &str| StateTransfer {
        current: current.to_string(),
        next: next.to_string(),
        trigger: Trigger::Interaction {
            name: interaction.to_string(),
        },
        compute_target: post_target(),
        condition: None,
    };
    StateMachine::new(
        vec![
            StateNode::named("normal"),
            StateNode::named("draft"),
            StateNode::named("published"),
        ],
        vec![
            transfer("normal", "draft", "draft"),
            transfer("draft", "normal", "finalize"),
            transfer("normal", "published", "publish"),
            transfer("published", "normal", "withdraw"),
        ],
        "normal",
    )
}

fn blog_schema() -> SchemaRegistry {
    let mut schema = SchemaRegistry::new();
    schema
        .add_entity(
            Entity::new("User")
                .with_property(Property::new("name", PropertyType::String))
                .with_property(Property::computed(
                    "post_count",
                    PropertyType::Number,
                    Computed::Count(Count::through("UserPost", RelationSide::Source)),
                )),
        )
        .unwrap();
    schema
        .add_entity(
            Entity::new("Post")
                .with_property(Property::new("title", PropertyType::String))
                .with_property(Property::computed(
                    "status",
                    PropertyType::String,
                    Computed::StateMachine(post_status_machine()),
                )),
        )
        .unwrap();
    schema
        .add_relation(Relation::new(
            "UserPost",
            "User",
            "posts",
            "Post",
            "owner",
            Cardinality::OneToMany,
        ))
        .unwrap();
    schema.add_global("post_total", Computed::Count(Count::of("Post")));
    schema
}

fn register_blog_interactions(controller: &mut Controller) {
    controller
        .register_interaction(Interaction::new("CreateUser").with_effect(EffectFn::new(
            |args, _store| {
                Ok(vec![StorageOp::create(
                    "User",
                    fields(&[("name", args.payload.get("name").cloned().unwrap_or(Value::Null))]),
                )])
            },
        )))
        .unwrap();

    controller
        .register_interaction(Interaction::new("CreatePost").with_effect(EffectFn::new(
            |args, _store| {
                let owner = payload_id(&args.payload, "owner")?;
                Ok(vec![StorageOp::create_linked(
                    "Post",
                    fields(&[(
                        "title",
                        args.payload.get("title").cloned().unwrap_or(Value::Null),
                    )]),
                    vec![LinkSpec {
                        relation: "UserPost".to_string(),
                        side: RelationSide::Target,
                        other: owner,
                        fields: Fields::new(),
                    }],
                )])
            },
        )))
        .unwrap();

    controller
        .register_interaction(Interaction::new("DeletePost").with_effect(EffectFn::new(
            |args, store| {
                let post = payload_id(&args.payload, "post")?;
                let links = store
                    .find(
                        "UserPost",
                        &MatchExpr::eq("target", json!(post.0)),
                        &Default::default(),
                    )
                    .map_err(|e| e.to_string())?;
                let mut ops: Vec<StorageOp> = links
                    .iter()
                    .map(|link| StorageOp::delete("UserPost", link.id))
                    .collect();
                ops.push(StorageOp::delete("Post", post));
                Ok(ops)
            },
        )))
        .unwrap();

    // Lifecycle interactions carry no storage effect of their own; the
    // state machine reacts to the journal record.
    for name in ["draft", "finalize", "publish", "withdraw"] {
        controller
            .register_interaction(Interaction::new(name))
            .unwrap();
    }
}

fn blog_controller() -> Controller {
    let mut controller = Controller::new(blog_schema(), Box::new(InMemoryStore::new()));
    register_blog_interactions(&mut controller);
    controller.setup(true).unwrap();
    controller
}

fn call(controller: &mut Controller, name: &str, payload: Value) {
    let result = controller.call_interaction(name, InteractionArgs::new(json!(null), payload));
    assert!(
        result.is_ok(),
        "interaction '{name}' failed: {:?}",
        result.error
    );
}

fn create_user(controller: &mut Controller, name: &str) -> RecordId {
    call(controller, "CreateUser", json!({ "name": name }));
    let users = controller
        .find("User", &MatchExpr::eq("name", json!(name)))
        .unwrap();
    users[0].id
}

fn create_post(controller: &mut Controller, owner: RecordId, title: &str) -> RecordId {
    call(
        controller,
        "CreatePost",
        json!({ "owner": owner.0, "title": title }),
    );
    let posts = controller
        .find("Post", &MatchExpr::eq("title", json!(title)))
        .unwrap();
    posts[0].id
}

fn post_count(controller: &Controller, user: RecordId) -> i64 {
    controller
        .record("User", user)
        .unwrap()
        .unwrap()
        .get_i64("post_count")
        .unwrap()
}

fn post_status(controller: &Controller, post: RecordId) -> String {
    controller
        .record("Post", post)
        .unwrap()
        .unwrap()
        .get_str("status")
        .unwrap()
        .to_string()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn count_over_relation_through_interactions() {
    let mut controller = blog_controller();

    let user = create_user(&mut controller, "A");
    assert_eq!(post_count(&controller, user), 0);
    assert_eq!(controller.global("post_total").unwrap(), Some(json!(0)));

    let post = create_post(&mut controller, user, "P1");
    assert_eq!(post_count(&controller, user), 1);
    assert_eq!(controller.global("post_total").unwrap(), Some(json!(1)));

    call(&mut controller, "DeletePost", json!({ "post": post.0 }));
    assert_eq!(post_count(&controller, user), 0);
    assert_eq!(controller.global("post_total").unwrap(), Some(json!(0)));
}

#[test]
fn state_machine_draft_publish_lifecycle() {
    let mut controller = blog_controller();
    let user = create_user(&mut controller, "A");
    let post = create_post(&mut controller, user, "P1");

    // Starts at the default state.
    assert_eq!(post_status(&controller, post), "normal");

    call(&mut controller, "draft", json!({ "post": post.0 }));
    assert_eq!(post_status(&controller, post), "draft");

    // No transfer from draft on publish: stays put.
    call(&mut controller, "publish", json!({ "post": post.0 }));
    assert_eq!(post_status(&controller, post), "draft");

    call(&mut controller, "finalize", json!({ "post": post.0 }));
    assert_eq!(post_status(&controller, post), "normal");

    call(&mut controller, "publish", json!({ "post": post.0 }));
    assert_eq!(post_status(&controller, post), "published");

    call(&mut controller, "withdraw", json!({ "post": post.0 }));
    assert_eq!(post_status(&controller, post), "normal");
}

#[test]
fn interactions_resolve_by_uuid() {
    let mut controller = Controller::new(blog_schema(), Box::new(InMemoryStore::new()));
    let uuid = controller
        .register_interaction(Interaction::new("CreateUser").with_effect(EffectFn::new(
            |_args, _store| Ok(vec![StorageOp::create("User", Fields::new())]),
        )))
        .unwrap();
    controller.setup(true).unwrap();

    let result = controller.call_interaction(
        &uuid.to_string(),
        InteractionArgs::new(json!(null), json!({})),
    );
    assert!(result.is_ok());
    assert_eq!(controller.find("User", &MatchExpr::All).unwrap().len(), 1);
}

#[test]
fn rejected_condition_journals_nothing() {
    let mut controller = Controller::new(blog_schema(), Box::new(InMemoryStore::new()));
    controller
        .register_interaction(
            Interaction::new("AdminReset")
                .with_condition(GuardFn::new(|args| {
                    Ok(args.user.get("role").and_then(Value::as_str) == Some("admin"))
                }))
                .with_effect(EffectFn::new(|_args, _store| {
                    Ok(vec![StorageOp::create("User", Fields::new())])
                })),
        )
        .unwrap();
    controller.setup(true).unwrap();

    let result = controller.call_interaction(
        "AdminReset",
        InteractionArgs::new(json!({ "role": "guest" }), json!({})),
    );
    assert!(matches!(
        result.error,
        Some(RuntimeError::ConditionRejected { .. })
    ));
    assert!(result.effects.is_empty());
    assert!(controller
        .find(INTERACTION_RECORD, &MatchExpr::All)
        .unwrap()
        .is_empty());
    assert!(controller.find("User", &MatchExpr::All).unwrap().is_empty());

    // The admin passes the same gate.
    let result = controller.call_interaction(
        "AdminReset",
        InteractionArgs::new(json!({ "role": "admin" }), json!({})),
    );
    assert!(result.is_ok());
    assert_eq!(controller.find("User", &MatchExpr::All).unwrap().len(), 1);
}

#[test]
fn unknown_interaction_comes_back_as_error() {
    let mut controller = blog_controller();
    let result =
        controller.call_interaction("Nope", InteractionArgs::new(json!(null), json!({})));
    assert!(matches!(
        result.error,
        Some(RuntimeError::UnknownInteraction { .. })
    ));
}

#[test]
fn calls_before_setup_are_rejected() {
    let mut controller = Controller::new(blog_schema(), Box::new(InMemoryStore::new()));
    register_blog_interactions(&mut controller);
    let result =
        controller.call_interaction("CreateUser", InteractionArgs::new(json!(null), json!({})));
    assert!(matches!(result.error, Some(RuntimeError::NotSetup)));
}

#[test]
fn async_task_resolution_roundtrip() {
    let mut schema = SchemaRegistry::new();
    schema
        .add_entity(Entity::new("Site").with_property(Property::new("url", PropertyType::String)))
        .unwrap();
    schema.add_global(
        "crawl_result",
        Computed::External(ExternalComputation::from(
            "Site",
            CollectArgsFn::new(|event| {
                event
                    .record
                    .as_ref()
                    .and_then(|r| r.get("url"))
                    .map(|url| json!({ "url": url }))
            }),
            AsyncReturnFn::new(|result, args| {
                Ok(json!({ "url": args.get("url"), "body": result }))
            }),
        )),
    );

    let mut controller = Controller::new(schema, Box::new(InMemoryStore::new()));
    controller
        .register_interaction(Interaction::new("AddSite").with_effect(EffectFn::new(
            |args, _store| {
                Ok(vec![StorageOp::create(
                    "Site",
                    fields(&[(
                        "url",
                        args.payload.get("url").cloned().unwrap_or(Value::Null),
                    )]),
                )])
            },
        )))
        .unwrap();
    controller.setup(true).unwrap();

    // Initial creation cannot resolve synchronously either: setup itself
    // suspends the global computation into a seed task.
    assert_eq!(controller.pending_tasks().unwrap().len(), 1);
    assert_eq!(controller.global("crawl_result").unwrap(), None);

    call(
        &mut controller,
        "AddSite",
        json!({ "url": "https://example.test" }),
    );

    // The mutation suspended into a second pending task; the value is
    // still unset.
    let pending = controller.pending_tasks().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(controller.global("crawl_result").unwrap(), None);

    // External actor resolves the mutation-triggered task directly
    // through storage, then resolution is an explicit resume call.
    let task = pending
        .iter()
        .find(|t| t.get("args").and_then(|a| a.get("url")).is_some())
        .expect("mutation-triggered task should carry args")
        .id;
    controller
        .store_mut()
        .update(
            TASK_RECORD,
            task,
            fields(&[
                ("status", json!(STATUS_SUCCESS)),
                ("result", json!("<html>")),
            ]),
        )
        .unwrap();
    controller.handle_async_return(task).unwrap();

    assert_eq!(
        controller.global("crawl_result").unwrap(),
        Some(json!({ "url": "https://example.test", "body": "<html>" }))
    );
    // The never-resolved seed task stays pending: no timeout exists, and
    // it no longer holds the value back.
    assert_eq!(controller.pending_tasks().unwrap().len(), 1);
}

#[test]
fn sqlite_backend_matches_memory_semantics() {
    let store = SqliteStore::in_memory().unwrap();
    let mut controller = Controller::new(blog_schema(), Box::new(store));
    register_blog_interactions(&mut controller);
    controller.setup(true).unwrap();

    let user = create_user(&mut controller, "A");
    let post = create_post(&mut controller, user, "P1");
    assert_eq!(post_count(&controller, user), 1);
    assert_eq!(controller.global("post_total").unwrap(), Some(json!(1)));

    call(&mut controller, "draft", json!({ "post": post.0 }));
    assert_eq!(post_status(&controller, post), "draft");

    call(&mut controller, "DeletePost", json!({ "post": post.0 }));
    assert_eq!(post_count(&controller, user), 0);
    assert_eq!(controller.global("post_total").unwrap(), Some(json!(0)));
}
