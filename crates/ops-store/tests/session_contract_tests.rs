//! Session Contract Tests
//!
//! Runs the same scenarios against the SQLite and in-memory backends so the
//! timer tasks can rely on identical ordering and filtering semantics.

use chrono::{DateTime, Duration, Utc};
use ops_common::{
    BlockRecord, Customer, FlowAction, NewNotification, Transaction, TransactionFlow,
    TransactionStatus,
};
use ops_store::{MemoryStore, SessionFactory, SqliteStore};
use sqlx::sqlite::SqlitePoolOptions;

fn at_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap()
}

struct Seed {
    transactions: Vec<Transaction>,
    flows: Vec<TransactionFlow>,
    customers: Vec<Customer>,
    blocks: Vec<BlockRecord>,
}

fn seed(now: DateTime<Utc>) -> Seed {
    let transaction = |id: i64, status: TransactionStatus| Transaction {
        id,
        status,
        current_party_user_id: "manager".to_string(),
        initiator_user_id: "teller".to_string(),
        updated_at: None,
    };
    let flow = |id: i64, tx_id: i64, action: FlowAction, hours_ago: i64, can_return: bool| {
        TransactionFlow {
            id,
            transaction_id: tx_id,
            action,
            action_date: at_millis(now - Duration::hours(hours_ago)),
            can_return,
            from_user_id: "teller".to_string(),
            to_user_id: "manager".to_string(),
        }
    };

    Seed {
        transactions: vec![
            transaction(1, TransactionStatus::Escalated),
            transaction(2, TransactionStatus::Pending),
            transaction(3, TransactionStatus::Escalated),
        ],
        flows: vec![
            flow(12, 1, FlowAction::Escalated, 1, true),
            flow(11, 1, FlowAction::Submitted, 6, false),
            flow(13, 3, FlowAction::Escalated, 2, true),
        ],
        customers: vec![Customer {
            id: 100,
            customer_number: "CIF-100".to_string(),
            name: "Acme Trading".to_string(),
        }],
        blocks: vec![
            BlockRecord {
                id: 200,
                customer_id: 100,
                blocked_by_user_id: "officer".to_string(),
                scheduled_unblock_date: Some(at_millis(now - Duration::hours(1))),
                actual_unblock_date: None,
            },
            BlockRecord {
                id: 201,
                customer_id: 100,
                blocked_by_user_id: "officer".to_string(),
                scheduled_unblock_date: Some(at_millis(now + Duration::hours(1))),
                actual_unblock_date: None,
            },
        ],
    }
}

fn memory_store(seed: Seed) -> MemoryStore {
    let store = MemoryStore::new();
    seed.transactions.into_iter().for_each(|t| store.insert_transaction(t));
    seed.flows.into_iter().for_each(|f| store.insert_flow(f));
    seed.customers.into_iter().for_each(|c| store.insert_customer(c));
    seed.blocks.into_iter().for_each(|b| store.insert_block(b));
    store
}

async fn sqlite_store(seed: Seed) -> SqliteStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteStore::new(pool);
    store.init_schema().await.unwrap();

    for t in seed.transactions {
        sqlx::query(
            "INSERT INTO transactions (id, status, current_party_user_id, initiator_user_id) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(t.id)
        .bind(t.status.as_str())
        .bind(&t.current_party_user_id)
        .bind(&t.initiator_user_id)
        .execute(store.pool())
        .await
        .unwrap();
    }
    for f in seed.flows {
        sqlx::query(
            "INSERT INTO transaction_flows \
             (id, transaction_id, action, action_date, can_return, from_user_id, to_user_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(f.id)
        .bind(f.transaction_id)
        .bind(f.action.as_str())
        .bind(f.action_date.timestamp_millis())
        .bind(f.can_return)
        .bind(&f.from_user_id)
        .bind(&f.to_user_id)
        .execute(store.pool())
        .await
        .unwrap();
    }
    for c in seed.customers {
        sqlx::query("INSERT INTO customers (id, customer_number, name) VALUES (?, ?, ?)")
            .bind(c.id)
            .bind(&c.customer_number)
            .bind(&c.name)
            .execute(store.pool())
            .await
            .unwrap();
    }
    for b in seed.blocks {
        sqlx::query(
            "INSERT INTO block_records (id, customer_id, blocked_by_user_id, \
             scheduled_unblock_date, actual_unblock_date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(b.id)
        .bind(b.customer_id)
        .bind(&b.blocked_by_user_id)
        .bind(b.scheduled_unblock_date.map(|d| d.timestamp_millis()))
        .bind(b.actual_unblock_date.map(|d| d.timestamp_millis()))
        .execute(store.pool())
        .await
        .unwrap();
    }
    store
}

async fn check_contract(factory: &dyn SessionFactory, now: DateTime<Utc>) {
    let mut session = factory.open_session().await.unwrap();

    let escalated = session.transactions_with_status(TransactionStatus::Escalated).await.unwrap();
    let ids: Vec<i64> = escalated.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![1, 3]);

    // Oldest first, regardless of id order
    let flows = session.flows_for_transaction(1).await.unwrap();
    let flow_ids: Vec<i64> = flows.iter().map(|f| f.id).collect();
    assert_eq!(flow_ids, vec![11, 12]);

    let overdue = session.overdue_block_records(now).await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].id, 200);

    let customer = session.find_customer(100).await.unwrap().unwrap();
    assert_eq!(customer.customer_number, "CIF-100");
    assert!(session.find_customer(999).await.unwrap().is_none());

    let stored = session
        .insert_notification(&NewNotification {
            from_user_id: "officer".to_string(),
            to_user_id: "officer".to_string(),
            subject: "Reminder".to_string(),
            message: "Unblock CIF-100".to_string(),
            link: "/blocking/unblock/100".to_string(),
            created_at: at_millis(now),
        })
        .await
        .unwrap();
    assert!(!stored.is_read);

    let listed = session.notifications_for_user("officer", true).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], stored);
}

#[tokio::test]
async fn test_memory_store_contract() {
    let now = Utc::now();
    let store = memory_store(seed(now));
    check_contract(&store, now).await;
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let now = Utc::now();
    let store = sqlite_store(seed(now)).await;
    check_contract(&store, now).await;
}
