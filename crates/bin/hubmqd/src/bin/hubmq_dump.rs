//! Event tap for debugging.
//!
//! Subscribes to the forwarder output and prints every event to
//! stdout, one line per event. An optional first argument restricts
//! the subscription to topics starting with that prefix.

use hubmq_client::EventSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint =
        std::env::var("HUBMQ_EVENTS_OUT").unwrap_or_else(|_| "tcp://127.0.0.1:40412".to_owned());
    let prefix = std::env::args().nth(1).unwrap_or_default();

    let mut subscriber = EventSubscriber::connect(&endpoint, &[prefix.as_str()]).await?;
    eprintln!("listening on {endpoint} (prefix {prefix:?})");

    loop {
        let event = subscriber.recv().await?;
        println!("{} {}", event.topic().id(), event.payload());
    }
}
