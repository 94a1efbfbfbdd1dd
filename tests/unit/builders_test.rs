//! Tests for builders

use std::sync::Arc;
use std::time::Instant;

use taskfleet::builders::{memory_audit_sink, EngineBuilder};
use taskfleet::config::EngineConfig;
use taskfleet::core::{
    Account, AccountStatus, Agent, Area, EngineError, NewTask, SchedulerRecord, TaskCategory,
    TaskStatus,
};
use taskfleet::infra::{InMemoryAreaQueue, InMemoryStore};

fn category() -> TaskCategory {
    TaskCategory {
        id: 1,
        name: "like".into(),
        processor: "fb_like".into(),
        configure_schema: String::new(),
        account_category: 1,
        job_timeout_secs: None,
    }
}

fn account(id: u64) -> Account {
    Account {
        id,
        category: 1,
        owner: 1,
        account: format!("acc-{id}"),
        status: AccountStatus::Valid,
        enable_tasks: Vec::new(),
        active_area: None,
        configure: String::new(),
    }
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = EngineConfig {
        sweep_workers: 0,
        ..EngineConfig::default()
    };
    let result = EngineBuilder::new(config).build();
    assert!(matches!(result, Err(EngineError::Configuration(_))));
}

#[test]
fn test_builder_registers_everything() {
    let engine = EngineBuilder::new(EngineConfig::default())
        .category(category())
        .account(account(1))
        .area(Area::new(1, "eu"))
        .agent(Agent {
            id: 7,
            area: 1,
            configure: String::new(),
        })
        .build()
        .unwrap();

    assert!(engine.category(1).is_some());
    assert_eq!(engine.accounts().len(), 1);
    assert_eq!(engine.agents_in(1).len(), 1);
    assert_eq!(engine.queue(1).unwrap().lock().max_depth(), 1024);
}

#[test]
fn test_builder_rejects_agent_without_area() {
    let result = EngineBuilder::new(EngineConfig::default())
        .agent(Agent {
            id: 1,
            area: 42,
            configure: String::new(),
        })
        .build();
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[test]
fn test_builder_with_custom_queue_and_store() {
    let store = Arc::new(InMemoryStore::new());
    let engine = EngineBuilder::new(EngineConfig::default())
        .store(store)
        .category(category())
        .account(account(1))
        .account(account(2))
        .area_with_queue(Area::new(1, "eu"), Box::new(InMemoryAreaQueue::new(1, 1)))
        .build()
        .unwrap();

    let id = engine
        .submit(
            NewTask {
                name: "two".into(),
                category: 1,
                creator: 1,
                scheduler: SchedulerRecord::default(),
                limit_counts: 1,
                accounts_num: 2,
                configure: "{}".into(),
                account_ids: Vec::new(),
            },
            0,
        )
        .unwrap();
    let tick = engine.process_task(id, 0, Instant::now()).unwrap();
    assert_eq!(tick.dispatched, 1);
    assert_eq!(engine.task(id).unwrap().status, TaskStatus::Running);
    assert_eq!(engine.dispatcher().queue_depth(1), 1);
}

#[test]
fn test_memory_audit_sink_records_engine_events() {
    let config = EngineConfig::default();
    let sink = memory_audit_sink(&config);
    let engine = EngineBuilder::new(config)
        .audit_sink(sink.clone())
        .category(category())
        .account(account(1))
        .area(Area::new(1, "eu"))
        .build()
        .unwrap();
    let id = engine
        .submit(
            NewTask {
                name: "one".into(),
                category: 1,
                creator: 1,
                scheduler: SchedulerRecord::default(),
                limit_counts: 1,
                accounts_num: 1,
                configure: String::new(),
                account_ids: Vec::new(),
            },
            0,
        )
        .unwrap();
    engine.process_task(id, 0, Instant::now()).unwrap();
    assert_eq!(sink.lock().for_task(id).len(), 2);
}
