// Events sent from deep inside the app to the top-level front end.
//
// The bus exists before any view does; events sent before the front end
// starts reading are queued in the channel.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sheet {
    RoutesList,
    RouteDetails,
    Alerts,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    PresentSheet(Sheet),
    ShowAlert { title: String, message: String },
    ShowStopCallout(String),
}

#[derive(Clone)]
pub struct EventBus {
    sender: UnboundedSender<AppEvent>,
}

impl EventBus {
    pub fn new() -> (Self, UnboundedReceiver<AppEvent>) {
        let (sender, receiver) = unbounded_channel();
        (EventBus { sender }, receiver)
    }

    pub fn publish(&self, event: AppEvent) {
        if self.sender.send(event).is_err() {
            log::debug!("Event dropped: front end is gone");
        }
    }

    pub fn present_sheet(&self, sheet: Sheet) {
        self.publish(AppEvent::PresentSheet(sheet));
    }

    pub fn alert(&self, title: &str, message: &str) {
        self.publish(AppEvent::ShowAlert {
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

/// Everything currently queued, without waiting.
pub fn drain(receiver: &mut UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_sent_before_reading_are_kept() {
        let (bus, mut receiver) = EventBus::new();
        bus.present_sheet(Sheet::RouteDetails);
        bus.alert("Error", "boom");

        assert_eq!(
            drain(&mut receiver),
            vec![
                AppEvent::PresentSheet(Sheet::RouteDetails),
                AppEvent::ShowAlert { title: "Error".to_string(), message: "boom".to_string() },
            ]
        );
    }

    #[test]
    fn test_publish_without_listener_is_harmless() {
        let (bus, receiver) = EventBus::new();
        drop(receiver);
        bus.present_sheet(Sheet::Alerts);
    }
}
