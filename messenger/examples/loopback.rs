use std::{cell::RefCell, rc::Rc, time::Duration};

use bytes::Bytes;
use messenger::{
    DeliveryOutcome, Disposition, MemorySession, Messenger, MessengerConfig, MessengerState,
    PendingQueue, SendStatus, Transfer, Utf8Codec,
};
use tokio::time::sleep;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let session = MemorySession::auto(4);
    let queue = PendingQueue::new();
    let outcomes: Rc<RefCell<Vec<(String, DeliveryOutcome)>>> = Rc::default();

    let config = MessengerConfig::new("loopback-device", "hub.local", &queue)
        .with_state_callback(|previous, new| println!("[Device] {previous} -> {new}"));
    let mut messenger = Messenger::create(config, session.clone(), Utf8Codec)?;
    messenger.subscribe_for_messages(|command: String| {
        println!("[Device] Received command: {command}");
        Disposition::Accepted
    });

    for i in 0..3 {
        let body = format!("telemetry #{i}");
        let log = outcomes.clone();
        let name = body.clone();
        queue.enqueue(body, move |outcome| log.borrow_mut().push((name, outcome)));
    }

    messenger.start()?;
    messenger.do_work();
    if messenger.state() != MessengerState::Started {
        return Err(format!("messenger did not start: {}", messenger.state()).into());
    }

    // The service side of both links.
    let mut events = session.take_send_peer().ok_or("send link was not attached")?;
    let mut commands = session
        .take_receive_peer()
        .ok_or("receive link was not attached")?;
    commands.deliver(Transfer {
        tag: 0,
        payload: Bytes::from_static(b"reboot"),
    });

    for _ in 0..10 {
        messenger.do_work();

        while let Some(transfer) = events.try_next_transfer() {
            println!(
                "[Service] Got event {}: {}",
                transfer.tag,
                String::from_utf8_lossy(&transfer.payload)
            );
            events.settle(transfer.tag, Disposition::Accepted);
        }
        while let Some((tag, disposition)) = commands.try_next_disposition() {
            println!("[Service] Command {tag} settled as {disposition:?}");
        }

        if messenger.send_status() == SendStatus::Idle {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    for (body, outcome) in outcomes.borrow().iter() {
        println!("[Device] '{body}' finished: {outcome}");
    }

    messenger.stop()?;
    messenger.do_work();
    println!("[Device] Final state: {}", messenger.state());
    messenger.destroy();
    Ok(())
}
