mod common;

use std::time::Duration;

use common::{Event, Harness, drain_transfers};
use messenger::{
    DeliveryOutcome, Disposition, LinkError, MemorySession, MessengerError, MessengerOptions,
    MessengerState::{self, *},
};

const LINK_TIMEOUT: Duration = Duration::from_secs(30);

fn options() -> MessengerOptions {
    MessengerOptions::default().with_link_timeouts(LINK_TIMEOUT, LINK_TIMEOUT)
}

/// Starts over a session that only attaches when told to.
fn started_manually() -> Harness {
    let mut h = Harness::new(MemorySession::manual(), options());
    h.messenger.start().expect("idle messenger starts");
    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Starting);

    assert_eq!(h.session.complete_attaches(8), 2);
    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Started);
    h
}

#[tokio::test(start_paused = true)]
async fn start_attaches_both_links_under_device_addresses() {
    let h = started_manually();
    let attached = h.session.attached();

    let names: Vec<_> = attached.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["link-snd-device-7-1", "link-rcv-device-7-1"]);
    assert_eq!(
        attached[0].address,
        "amqps://hub.example.net/devices/device-7/messages/events"
    );
    assert_eq!(
        attached[1].address,
        "amqps://hub.example.net/devices/device-7/messages/devicebound"
    );
    assert_eq!(h.states(), [(Idle, Starting), (Starting, Started)]);
}

#[tokio::test(start_paused = true)]
async fn link_fault_moves_to_error_once_and_waits_for_the_owner() {
    let (mut h, mut events, _commands) = Harness::started(options());
    h.enqueue("m1");
    h.messenger.do_work();
    assert_eq!(h.messenger.in_flight_count(), 1);

    events.fail(LinkError::SessionClosed("connection reset".into()));
    h.messenger.do_work();

    assert_eq!(h.messenger.state(), Error);
    assert_eq!(
        h.states(),
        [(Idle, Starting), (Starting, Started), (Started, Error)]
    );
    assert_eq!(h.outcomes(), [("m1".to_string(), DeliveryOutcome::Aborted)]);
    assert_eq!(h.session.detached().len(), 2, "both links are torn down");

    h.enqueue("m2");
    for _ in 0..3 {
        h.messenger.do_work();
    }
    assert_eq!(h.states().len(), 3, "no further transitions until start");
    assert_eq!(h.queue.len(), 1, "nothing is drained while in error");

    h.messenger.start().expect("owner retries from error");
    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Started);
    assert_eq!(
        h.states()[3..],
        [(Error, Starting), (Starting, Started)]
    );

    let mut events = h.session.take_send_peer().expect("send link reattached");
    h.messenger.do_work();
    let sent = drain_transfers(&mut events);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "m2");
}

#[tokio::test(start_paused = true)]
async fn vanished_transport_is_a_fault() {
    let (mut h, events, _commands) = Harness::started(options());
    drop(events);

    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Error);
}

#[tokio::test(start_paused = true)]
async fn settlement_that_arrived_before_a_fault_is_kept() {
    let (mut h, mut events, _commands) = Harness::started(options());
    h.enqueue("m1");
    h.enqueue("m2");
    h.messenger.do_work();
    let sent = drain_transfers(&mut events);

    events.settle(sent[0].0, Disposition::Accepted);
    events.fail(LinkError::SessionClosed("connection reset".into()));
    h.messenger.do_work();

    assert_eq!(h.messenger.state(), Error);
    assert_eq!(
        h.outcomes(),
        [
            ("m1".to_string(), DeliveryOutcome::Acknowledged),
            ("m2".to_string(), DeliveryOutcome::Aborted),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn receive_link_fault_moves_to_error() {
    let (mut h, _events, mut commands) = Harness::started(options());
    h.enqueue("m1");
    h.messenger.do_work();

    commands.fail(LinkError::Detached("service closed the receive link".into()));
    h.messenger.do_work();

    assert_eq!(h.messenger.state(), Error);
    assert_eq!(h.states().last(), Some(&(Started, Error)));
    assert_eq!(h.outcomes(), [("m1".to_string(), DeliveryOutcome::Aborted)]);
    assert_eq!(h.session.detached().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_reports_settlements_that_already_arrived() {
    let (mut h, mut events, _commands) = Harness::started(options());
    h.enqueue("m1");
    h.enqueue("m2");
    h.messenger.do_work();
    let sent = drain_transfers(&mut events);

    events.settle(sent[1].0, Disposition::Accepted);
    h.messenger.stop().expect("started messenger stops");

    assert_eq!(
        h.outcomes(),
        [
            ("m2".to_string(), DeliveryOutcome::Acknowledged),
            ("m1".to_string(), DeliveryOutcome::Aborted),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_aborts_in_flight_messages_before_reporting_idle() {
    let mut h = started_manually();
    let mut events = h.session.take_send_peer().expect("send link attached");
    let _commands = h.session.take_receive_peer().expect("receive link attached");
    h.enqueue("m1");
    h.enqueue("m2");
    h.messenger.do_work();
    assert_eq!(drain_transfers(&mut events).len(), 2);

    h.messenger.stop().expect("started messenger stops");
    assert_eq!(h.messenger.state(), Stopping);
    assert_eq!(h.messenger.in_flight_count(), 0);

    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Stopping, "detach not confirmed yet");
    assert_eq!(h.session.complete_detaches(), 2);
    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Idle);

    let log = h.log.borrow();
    let idle_at = log
        .iter()
        .position(|e| *e == Event::State(Stopping, Idle))
        .expect("idle reported");
    let aborted: Vec<_> = log[..idle_at]
        .iter()
        .filter(|e| matches!(e, Event::Outcome(_, DeliveryOutcome::Aborted)))
        .collect();
    assert_eq!(aborted.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn settlement_after_stop_is_ignored() {
    let mut h = started_manually();
    let mut events = h.session.take_send_peer().expect("send link attached");
    h.enqueue("m1");
    h.messenger.do_work();
    let sent = drain_transfers(&mut events);

    h.messenger.stop().expect("started messenger stops");
    events.settle(sent[0].0, Disposition::Accepted);
    h.session.complete_detaches();
    h.messenger.do_work();

    assert_eq!(h.outcomes(), [("m1".to_string(), DeliveryOutcome::Aborted)]);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_detach_completes_at_the_deadline() {
    let mut h = started_manually();
    h.messenger.stop().expect("started messenger stops");

    tokio::time::advance(LINK_TIMEOUT - Duration::from_secs(1)).await;
    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Stopping);

    tokio::time::advance(Duration::from_secs(1)).await;
    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Idle);
    assert_eq!(h.session.pending_detaches(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_while_starting_cancels_the_attach() {
    let mut h = Harness::new(MemorySession::manual(), options());
    h.messenger.start().expect("idle messenger starts");
    h.messenger.stop().expect("starting messenger stops");

    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Idle);
    assert_eq!(h.states(), [(Idle, Starting), (Starting, Stopping), (Stopping, Idle)]);
}

#[tokio::test(start_paused = true)]
async fn refused_attach_moves_to_error() {
    let mut h = Harness::new(MemorySession::manual(), options());
    h.messenger.start().expect("idle messenger starts");
    h.session
        .fail_attaches(LinkError::AttachFailed("unauthorized".into()));

    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Error);
    assert_eq!(h.states().last(), Some(&(Starting, Error)));
}

#[tokio::test(start_paused = true)]
async fn attach_that_never_completes_times_out() {
    let mut h = Harness::new(MemorySession::manual(), options());
    h.messenger.start().expect("idle messenger starts");

    tokio::time::advance(LINK_TIMEOUT / 2).await;
    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Starting);

    tokio::time::advance(LINK_TIMEOUT).await;
    h.messenger.do_work();
    assert_eq!(h.messenger.state(), Error);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_calls_in_the_wrong_state_are_rejected() {
    let (mut h, _events, _commands) = Harness::started(options());

    assert!(matches!(
        h.messenger.start(),
        Err(MessengerError::InvalidState {
            state: Started,
            action: "start"
        })
    ));

    h.messenger.stop().expect("started messenger stops");
    assert!(h.messenger.stop().is_err());
    assert!(h.messenger.start().is_err());
    assert_eq!(h.messenger.state(), Stopping);
}

#[tokio::test(start_paused = true)]
async fn destroy_aborts_in_flight_and_detaches() {
    let (h, _events, _commands) = Harness::started(options());
    h.enqueue("m1");
    let Harness {
        mut messenger,
        session,
        queue,
        log,
    } = h;
    messenger.do_work();
    let states_before = log.borrow().len();

    messenger.destroy();

    assert_eq!(session.detached().len(), 2);
    assert!(queue.is_empty());
    let log = log.borrow();
    assert_eq!(
        log[states_before..],
        [Event::Outcome("m1".to_string(), DeliveryOutcome::Aborted)]
    );
}

#[test]
fn state_names_are_stable() {
    let names: Vec<_> = [Idle, Starting, Started, Stopping, MessengerState::Error]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names, ["IDLE", "STARTING", "STARTED", "STOPPING", "ERROR"]);
}
