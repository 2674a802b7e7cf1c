mod common;

use alloy::primitives::{address, Address, B256, U256};
use common::{STRATEGY_1, STRATEGY_2};
use liquidity_orchestrator::clients::processor_fn;
use liquidity_orchestrator::domain::{
    BalanceEvent, EffectOutcome, EffectResult, ExternalEvent, MailboxEvent, PoolEvent, PoolState,
};
use liquidity_orchestrator::error::OrchestratorError;
use liquidity_orchestrator::mailbox::MailboxManager;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const POOL_P1: Address = address!("88e6a0c2ddd26feeb64f039a2c41296fcb3f5640");

fn pool_event(tick: i32) -> MailboxEvent {
    MailboxEvent::external(ExternalEvent::Pool(PoolEvent {
        chain_id: 1,
        pool: POOL_P1,
        state: PoolState {
            sqrt_price_x96: U256::from(1u64) << 96usize,
            tick,
            liquidity: 1_000_000,
            fee_growth_global0_x128: U256::ZERO,
            fee_growth_global1_x128: U256::ZERO,
        },
    }))
}

fn balance_event(holder: Address) -> MailboxEvent {
    MailboxEvent::external(ExternalEvent::Balance(BalanceEvent {
        chain_id: 1,
        holder,
        token: Address::ZERO,
        balance: U256::from(1_000u64),
    }))
}

fn effect_result(id: u8) -> MailboxEvent {
    MailboxEvent::effect_result(EffectResult::succeeded(B256::repeat_byte(id), EffectOutcome::default()))
}

fn label(event: &MailboxEvent) -> String {
    match event {
        MailboxEvent::External {
            payload: ExternalEvent::Pool(p),
            ..
        } => format!("pool:{}", p.state.tick),
        MailboxEvent::External { subscription_type, .. } => subscription_type.to_string(),
        MailboxEvent::EffectResult { payload } => format!("effect:{}", payload.effect_id.0[0]),
    }
}

#[tokio::test]
async fn pool_event_then_effect_result_keep_order_with_other_strategy_interleaved() {
    let started: Arc<Mutex<Vec<(Address, String, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let finished: Arc<Mutex<Vec<(Address, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let (s, f) = (started.clone(), finished.clone());

    let manager = MailboxManager::new(processor_fn(move |strategy, event| {
        let (s, f) = (s.clone(), f.clone());
        async move {
            let name = label(&event);
            s.lock().unwrap().push((strategy, name.clone(), Instant::now()));
            if strategy == STRATEGY_1 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            f.lock().unwrap().push((strategy, name));
            Ok(())
        }
    }));

    let t0 = Instant::now();
    manager.dispatch_to_strategy(STRATEGY_1, pool_event(100));
    manager.dispatch_to_strategy(STRATEGY_2, balance_event(STRATEGY_2));
    manager.dispatch_to_strategy(STRATEGY_1, effect_result(0xe1));

    assert!(manager.wait_until_idle(Duration::from_secs(5), Duration::from_millis(5)).await);

    let finished = finished.lock().unwrap();
    let s1: Vec<&str> = finished
        .iter()
        .filter(|(s, _)| *s == STRATEGY_1)
        .map(|(_, l)| l.as_str())
        .collect();
    assert_eq!(s1, vec!["pool:100", "effect:225"]);

    // S2 started while S1 was still busy with its first event.
    let started = started.lock().unwrap();
    let s2_start = started.iter().find(|(s, _, _)| *s == STRATEGY_2).unwrap().2;
    assert!(s2_start.duration_since(t0) < Duration::from_millis(50));
    let s2_position = finished.iter().position(|(s, _)| *s == STRATEGY_2).unwrap();
    assert_eq!(s2_position, 0);
}

#[tokio::test]
async fn concurrent_producers_observe_fifo_and_single_flight() {
    const PRODUCERS: u8 = 4;
    const PER_PRODUCER: u8 = 25;

    let seen: Arc<Mutex<Vec<(u8, u8)>>> = Arc::new(Mutex::new(Vec::new()));
    let in_flight = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let (seen_c, flight_c, overlaps_c) = (seen.clone(), in_flight.clone(), overlaps.clone());

    let manager = Arc::new(MailboxManager::new(processor_fn(move |_, event| {
        let (seen, flight, overlaps) = (seen_c.clone(), flight_c.clone(), overlaps_c.clone());
        async move {
            if flight.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            if let Some(id) = event.effect_id() {
                seen.lock().unwrap().push((id.0[0], id.0[1]));
            }
            flight.store(false, Ordering::SeqCst);
            Ok(())
        }
    })));

    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let manager = manager.clone();
        producers.push(tokio::spawn(async move {
            for seq in 0..PER_PRODUCER {
                let mut id = [0u8; 32];
                id[0] = producer;
                id[1] = seq;
                manager.dispatch_to_strategy(
                    STRATEGY_1,
                    MailboxEvent::effect_result(EffectResult::failed(B256::from(id), "x")),
                );
                tokio::task::yield_now().await;
            }
        }));
    }
    for p in producers {
        p.await.unwrap();
    }
    assert!(manager.wait_until_idle(Duration::from_secs(5), Duration::from_millis(5)).await);

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), (PRODUCERS as usize) * (PER_PRODUCER as usize));
    for producer in 0..PRODUCERS {
        let order: Vec<u8> = seen.iter().filter(|(p, _)| *p == producer).map(|(_, s)| *s).collect();
        assert_eq!(order, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn failing_event_does_not_block_the_mailbox() {
    let processed = Arc::new(AtomicUsize::new(0));
    let p = processed.clone();
    let manager = MailboxManager::new(processor_fn(move |_, event| {
        let p = p.clone();
        async move {
            if label(&event) == "pool:1" {
                return Err(OrchestratorError::Ledger("strategy reverted".into()));
            }
            if label(&event) == "pool:2" {
                panic!("processor bug");
            }
            p.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    manager.dispatch_to_strategy(STRATEGY_1, pool_event(1));
    manager.dispatch_to_strategy(STRATEGY_1, pool_event(2));
    manager.dispatch_to_strategy(STRATEGY_1, pool_event(3));
    assert!(manager.wait_until_idle(Duration::from_secs(5), Duration::from_millis(5)).await);

    assert_eq!(processed.load(Ordering::SeqCst), 1);
    let stats = manager.get_stats();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.processed, 1);
    assert!(!manager.has_pending_work());
}
