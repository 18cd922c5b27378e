//! Descriptor ownership and transfer tests

use messaging_actors::{
    ActorId, ActorSystem, BehaviorRegistry, DescriptorId, RuntimeConfig, RuntimeError,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn config(workers: usize) -> RuntimeConfig {
    RuntimeConfig {
        workers,
        ..RuntimeConfig::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Actors that idle until told to stop
fn holders() -> BehaviorRegistry {
    let mut behaviors = BehaviorRegistry::new();
    behaviors.register_fn("holder", "main", |ctx, _args| async move {
        loop {
            let payload = ctx.recv().await?;
            if payload.get_str("op") == Some("stop") {
                return Ok(vec![]);
            }
        }
    });
    behaviors
}

fn stop(system: &ActorSystem, actor: ActorId) {
    let mut payload = system.new_payload();
    payload.set("op", "stop").unwrap();
    system.send(actor, payload).unwrap();
}

#[tokio::test]
async fn test_opposite_transfers_do_not_deadlock() {
    let system = Arc::new(ActorSystem::new(config(2), holders()).unwrap());
    let a = system.spawn("holder", "main", system.new_payload()).unwrap();
    let b = system.spawn("holder", "main", system.new_payload()).unwrap();

    let x = system.register_descriptor(a, 100).unwrap();
    let y = system.register_descriptor(b, 200).unwrap();

    const ROUNDS: usize = 1_000;
    let mover = |system: Arc<ActorSystem>, descriptor: DescriptorId, from: ActorId, to: ActorId| {
        thread::spawn(move || {
            for _ in 0..ROUNDS {
                system.transfer_descriptor(descriptor, to).unwrap();
                system.transfer_descriptor(descriptor, from).unwrap();
            }
        })
    };
    let first = mover(Arc::clone(&system), x, a, b);
    let second = mover(Arc::clone(&system), y, b, a);

    let joined = tokio::task::spawn_blocking(move || {
        first.join().is_ok() && second.join().is_ok()
    });
    assert!(timeout(WAIT, joined).await.unwrap().unwrap());

    assert_eq!(system.descriptors_of(a).unwrap(), vec![x]);
    assert_eq!(system.descriptors_of(b).unwrap(), vec![y]);
    assert_eq!(system.descriptor_owner(x), Some(a));
    assert_eq!(system.descriptor_owner(y), Some(b));
    assert_eq!(system.stats().descriptors_transferred, 4 * ROUNDS as u64);
}

#[tokio::test]
async fn test_descriptor_lives_in_exactly_one_set() {
    let system = ActorSystem::new(config(1), holders()).unwrap();
    let a = system.spawn("holder", "main", system.new_payload()).unwrap();
    let b = system.spawn("holder", "main", system.new_payload()).unwrap();
    let x = system.register_descriptor(a, 7).unwrap();

    system.transfer_descriptor(x, b).unwrap();
    assert!(system.descriptors_of(a).unwrap().is_empty());
    assert_eq!(system.descriptors_of(b).unwrap(), vec![x]);

    // moving to the current owner changes nothing
    system.transfer_descriptor(x, b).unwrap();
    assert_eq!(system.descriptors_of(b).unwrap(), vec![x]);
    assert_eq!(system.stats().descriptors_transferred, 1);
}

#[tokio::test]
async fn test_transfer_to_dead_actor_keeps_owner() {
    let system = ActorSystem::new(config(1), holders()).unwrap();
    let a = system.spawn("holder", "main", system.new_payload()).unwrap();
    let b = system.spawn("holder", "main", system.new_payload()).unwrap();
    let x = system.register_descriptor(a, 1).unwrap();

    stop(&system, b);
    wait_until(|| !system.is_alive(b)).await;

    let err = system.transfer_descriptor(x, b).unwrap_err();
    assert!(matches!(err, RuntimeError::ActorNotFound { actor } if actor == b));
    assert_eq!(system.descriptor_owner(x), Some(a));
    assert_eq!(system.descriptors_of(a).unwrap(), vec![x]);
}

#[tokio::test]
async fn test_teardown_closes_owned_descriptors() {
    let system = ActorSystem::new(config(1), holders()).unwrap();
    let a = system.spawn("holder", "main", system.new_payload()).unwrap();
    let x = system.register_descriptor(a, 1).unwrap();
    let y = system.register_descriptor(a, 2).unwrap();

    stop(&system, a);
    wait_until(|| system.stats().actors_stopped == 1).await;

    assert_eq!(system.descriptor_owner(x), None);
    assert_eq!(system.descriptor_owner(y), None);
    let stats = system.stats();
    assert_eq!(stats.descriptors_opened, 2);
    assert_eq!(stats.descriptors_closed, 2);
    assert!(matches!(
        system.close_descriptor(x),
        Err(RuntimeError::DescriptorNotFound { .. })
    ));
}

#[tokio::test]
async fn test_attach_requires_ownership() {
    let (report, mut reports) = mpsc::unbounded_channel();
    let mut behaviors = holders();
    behaviors.register_fn("giver", "main", move |ctx, _args| {
        let report = report.clone();
        async move {
            let order = ctx.recv().await?;
            let descriptor = order
                .get_opaque("descriptor")
                .map(DescriptorId::from_opaque)
                .ok_or_else(|| RuntimeError::behavior("missing descriptor"))?;
            let to = order
                .get_opaque("to")
                .map(ActorId::from_opaque)
                .ok_or_else(|| RuntimeError::behavior("missing target"))?;

            let first = ctx.attach(descriptor, to).map_err(|e| e.category());
            let second = ctx.attach(descriptor, to).map_err(|e| e.category());
            let _ = report.send((first, second, ctx.descriptors()));
            Ok(vec![])
        }
    });

    let system = ActorSystem::new(config(2), behaviors).unwrap();
    let giver = system.spawn("giver", "main", system.new_payload()).unwrap();
    let holder = system.spawn("holder", "main", system.new_payload()).unwrap();
    let x = system.register_descriptor(giver, 42).unwrap();

    let mut order = system.new_payload();
    order.set_opaque("descriptor", x).unwrap();
    order.set_opaque("to", holder).unwrap();
    system.send(giver, order).unwrap();

    let (first, second, left) = timeout(WAIT, reports.recv()).await.unwrap().unwrap();
    assert_eq!(first, Ok(()));
    assert_eq!(second, Err("descriptor_not_owned"));
    assert!(left.is_empty());
    assert_eq!(system.descriptor_owner(x), Some(holder));

    // the giver is gone; the descriptor stays with the holder
    wait_until(|| !system.is_alive(giver)).await;
    assert_eq!(system.descriptors_of(holder).unwrap(), vec![x]);
}

#[tokio::test]
async fn test_child_claims_handle_from_its_args() {
    let (report, mut reports) = mpsc::unbounded_channel();
    let mut behaviors = holders();
    behaviors.register_fn("taker", "main", move |ctx, args| {
        let report = report.clone();
        async move {
            let descriptor = args
                .get_opaque("conn")
                .map(DescriptorId::from_opaque)
                .ok_or_else(|| RuntimeError::behavior("missing conn"))?;
            let claimed = ctx.claim(descriptor).map_err(|e| e.category());
            let owned = ctx.descriptors();
            let again = ctx.claim(descriptor).map_err(|e| e.category());
            let unknown = ctx.claim(DescriptorId::from_bits(0x0000_0009_0000_0009)).map_err(|e| e.category());
            let _ = report.send((claimed, owned, again, unknown));

            ctx.recv().await?;
            Ok(vec![])
        }
    });

    let system = ActorSystem::new(config(2), behaviors).unwrap();
    let parent = system.spawn("holder", "main", system.new_payload()).unwrap();
    let x = system.register_descriptor(parent, 5).unwrap();

    let mut args = system.new_payload();
    args.set_opaque("conn", x).unwrap();
    let child = system.spawn("taker", "main", args).unwrap();

    let (claimed, owned, again, unknown) = timeout(WAIT, reports.recv()).await.unwrap().unwrap();
    assert_eq!(claimed, Ok(()));
    assert_eq!(owned, vec![x]);
    assert_eq!(again, Ok(()));
    assert_eq!(unknown, Err("descriptor_not_found"));

    assert_eq!(system.descriptor_owner(x), Some(child));
    assert!(system.descriptors_of(parent).unwrap().is_empty());
    assert_eq!(system.stats().descriptors_transferred, 1);

    stop(&system, child);
    wait_until(|| system.descriptor_owner(x).is_none()).await;
    assert!(!system.is_alive(child));
}
