use futures::StreamExt;
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{error, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::constants::EVENT_CHANNEL_SIZE;
use crate::device::types::{ClientEvent, Connection, ConnectionState, RadioState, TremorReading};
use crate::error::ClientError;

/// Receives what the client reports. Implemented by whatever presents readings to the user.
pub trait EventSink: Send {
    fn on_radio_unavailable(&mut self, state: RadioState);
    fn on_connection_state_changed(&mut self, connection: &Connection);
    fn on_reading(&mut self, reading: &TremorReading);
    fn on_error(&mut self, error: &ClientError, context: &str);
}

pub fn dispatch<S: EventSink + ?Sized>(sink: &mut S, event: &ClientEvent) {
    match event {
        ClientEvent::RadioUnavailable(state) => sink.on_radio_unavailable(*state),
        ClientEvent::ConnectionStateChanged(connection) => sink.on_connection_state_changed(connection),
        ClientEvent::Reading(reading) => sink.on_reading(reading),
        ClientEvent::Error { error, context } => sink.on_error(error, context),
    }
}

/// Runs `sink` on its own task, fed by a single consumer channel. The client never calls the
/// sink directly, so the sink does not care which task produced an event.
pub fn sink_task<S: EventSink + 'static>(cancel: CancellationToken, mut sink: S) -> (Sender<ClientEvent>, JoinHandle<S>) {
    let (tx, rx) = channel::<ClientEvent>(EVENT_CHANNEL_SIZE);

    let handle = spawn(async move {
        drain_events(cancel, rx, &mut sink).await;
        sink
    });

    (tx, handle)
}

async fn drain_events<S: EventSink>(cancel: CancellationToken, mut rx: Receiver<ClientEvent>, sink: &mut S) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = rx.next() => match event {
                Some(event) => dispatch(sink, &event),
                None => break 'mainloop,
            },
        }
    }
}

/// Writes every event to the log, using the same labels the tremor screen shows.
#[derive(Debug, Default)]
pub struct LogSink {
    latest: Option<TremorReading>,
}

impl LogSink {
    pub fn new() -> Self {
        LogSink { latest: None }
    }

    pub fn latest(&self) -> Option<&TremorReading> {
        self.latest.as_ref()
    }
}

impl EventSink for LogSink {
    fn on_radio_unavailable(&mut self, state: RadioState) {
        warn!("Bluetooth not available. State: {:?}", state);
    }

    fn on_connection_state_changed(&mut self, connection: &Connection) {
        match &connection.state {
            ConnectionState::Failed(reason) => warn!("Connection to {} failed: {}", connection.peripheral, reason),
            state => info!("Connection to {}: {:?}", connection.peripheral, state),
        }
    }

    fn on_reading(&mut self, reading: &TremorReading) {
        // repeated readings are common, only a change is worth a line at info level
        if self.latest.map(|latest| latest.decoded_state) != Some(reading.decoded_state) {
            info!("{}", reading.decoded_state);
        }
        self.latest = Some(*reading);
    }

    fn on_error(&mut self, error: &ClientError, context: &str) {
        error!("{}: {}", context, error);
    }
}

#[cfg(test)]
mod tests {
    use futures::SinkExt;
    use super::*;
    use crate::device::types::{PeripheralId, TremorState};

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<String>,
    }

    impl EventSink for RecordingSink {
        fn on_radio_unavailable(&mut self, state: RadioState) {
            self.events.push(format!("radio {:?}", state));
        }

        fn on_connection_state_changed(&mut self, connection: &Connection) {
            self.events.push(format!("connection {:?}", connection.state));
        }

        fn on_reading(&mut self, reading: &TremorReading) {
            self.events.push(reading.decoded_state.to_string());
        }

        fn on_error(&mut self, error: &ClientError, context: &str) {
            self.events.push(format!("{}: {}", context, error));
        }
    }

    fn reading(raw_value: u16, decoded_state: TremorState) -> TremorReading {
        TremorReading { raw_value, decoded_state }
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let cancel = CancellationToken::new();
        let (mut tx, handle) = sink_task(cancel, RecordingSink::default());

        tx.send(ClientEvent::RadioUnavailable(RadioState::PoweredOff)).await.unwrap();
        tx.send(ClientEvent::ConnectionStateChanged(Connection {
            peripheral: PeripheralId::from("a"),
            state: ConnectionState::Connected,
        })).await.unwrap();
        tx.send(ClientEvent::Reading(reading(0x0200, TremorState::Dyskinesia))).await.unwrap();
        tx.send(ClientEvent::Error { error: ClientError::ServiceNotFound, context: "discovery".to_string() }).await.unwrap();
        drop(tx);

        let sink = handle.await.unwrap();
        assert_eq!(sink.events, vec![
            "radio PoweredOff".to_string(),
            "connection Connected".to_string(),
            "Dyskinesia Detected".to_string(),
            "discovery: The tremor service is not offered by the peripheral".to_string(),
        ]);
    }

    #[tokio::test]
    async fn cancel_stops_the_sink() {
        let cancel = CancellationToken::new();
        let (_tx, handle) = sink_task(cancel.clone(), RecordingSink::default());

        cancel.cancel();
        let sink = handle.await.unwrap();
        assert!(sink.events.is_empty());
    }

    #[test]
    fn log_sink_keeps_latest_reading() {
        let mut sink = LogSink::new();
        dispatch(&mut sink, &ClientEvent::Reading(reading(0x0001, TremorState::Tremor)));
        dispatch(&mut sink, &ClientEvent::Reading(reading(0x0BAD, TremorState::Unknown(0x0BAD))));

        assert_eq!(sink.latest(), Some(&reading(0x0BAD, TremorState::Unknown(0x0BAD))));
    }
}
