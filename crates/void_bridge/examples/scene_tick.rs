//! Scene tick demonstration
//!
//! This example shows:
//! - A scene pushing its state into the bridge
//! - A host system queueing messages from another thread
//! - The scene pulling those messages back
//! - Malformed input turning into a reported fault
//!
//! Run with `RUST_LOG=debug` to see the bridge's own logging.

use std::thread;
use void_bridge::prelude::*;
use void_bridge::NullWorld;
use void_crdt::{codec, ProcessedMessage};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Scene Bridge Demo");
    println!("=================\n");

    let config = BridgeConfig::default();
    let pool = BufferPool::new(config.pool_config());
    let (reporter, faults) = fault_channel(config.bridge.fault_channel_capacity);
    let mut bridge = SceneBridge::new(&config, pool.clone(), NullWorld, reporter);

    // Scene side: one tick worth of state
    let transform = ComponentId::new(1);
    let scene_messages: Vec<ProcessedMessage> = (0..4u16)
        .map(|n| {
            CrdtMessage::put(EntityId::new(n, 0), transform, Timestamp::new(1), pool.copy_from(&[n as u8; 12])).into()
        })
        .collect();
    let mut wire = Vec::new();
    if let Err(err) = codec::encode_into(&scene_messages, &mut wire) {
        eprintln!("Failed to encode scene state: {}", err);
        return;
    }

    bridge.push_state(&wire);
    println!("Pushed {} bytes, store holds {} messages", wire.len(), bridge.store().message_count());

    // Host side: systems on other threads queue updates for the scene
    let outgoing = bridge.outgoing();
    let host = {
        let pool = pool.clone();
        thread::spawn(move || {
            for n in 0..4u16 {
                let message = CrdtMessage::put(EntityId::new(n, 0), ComponentId::new(2), Timestamp::new(1), pool.copy_from(b"host"));
                if let Err(err) = outgoing.add(message) {
                    eprintln!("Host update dropped: {}", err);
                }
            }
        })
    };
    if host.join().is_err() {
        eprintln!("Host thread panicked");
        return;
    }

    let pulled = bridge.pull_state();
    match codec::decode(pulled, &pool) {
        Ok(messages) => println!("Pulled {} bytes carrying {} messages", pulled.len(), messages.len()),
        Err(err) => eprintln!("Pulled bytes did not decode: {}", err),
    }

    // A broken batch is rejected whole and reported
    bridge.push_state(&wire[..wire.len() - 3]);
    for fault in faults.try_iter() {
        println!("Fault in {} ({:?}): {}", fault.operation, fault.kind, fault.message);
    }

    bridge.set_disposing();
    println!("\n{:?}", bridge.stats());
    println!("{:?}", pool.stats());
}
