//! Outbound position reporting.
//!
//! The reporter rounds the local position and field size into an
//! [`OutboundFrame`] and publishes it on the bus. It never touches the
//! network session; whichever session is alive holds a subscription.
//!
//! With a throttle configured, reports inside the window are parked as
//! pending and go out on the next [`PositionReporter::poll`] after the
//! window, or immediately through `report_final`/`flush`. The last
//! position handed to the reporter is therefore always published.

use std::time::Duration;

use presence_shared::{
    event::EventBus,
    math::{FieldSize, Position},
    net::OutboundFrame,
};
use tokio::time::Instant;
use tracing::trace;

pub struct PositionReporter {
    bus: EventBus<OutboundFrame>,
    throttle: Option<Duration>,
    last_published_at: Option<Instant>,
    last_published: Option<OutboundFrame>,
    pending: Option<OutboundFrame>,
}

impl PositionReporter {
    pub fn new(bus: EventBus<OutboundFrame>, throttle: Option<Duration>) -> Self {
        Self {
            bus,
            throttle,
            last_published_at: None,
            last_published: None,
            pending: None,
        }
    }

    /// Reports a position; returns whether it was published right away.
    pub fn report(&mut self, position: Position, size: FieldSize) -> bool {
        self.report_at(OutboundFrame::new(position, size), Instant::now())
    }

    pub fn report_at(&mut self, frame: OutboundFrame, now: Instant) -> bool {
        let open = match (self.throttle, self.last_published_at) {
            (Some(window), Some(at)) => now.saturating_duration_since(at) >= window,
            _ => true,
        };
        if open {
            self.publish(frame, now);
        } else {
            self.pending = Some(frame);
        }
        open
    }

    /// Publishes regardless of the throttle; used when motion stops.
    pub fn report_final(&mut self, position: Position, size: FieldSize) {
        self.publish(OutboundFrame::new(position, size), Instant::now());
    }

    /// Publishes the pending frame if the throttle window has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(frame) => self.report_at(frame, now),
            None => false,
        }
    }

    /// Publishes the pending frame, if any, regardless of the throttle.
    pub fn flush(&mut self) -> bool {
        match self.pending {
            Some(frame) => {
                self.publish(frame, Instant::now());
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> Option<OutboundFrame> {
        self.pending
    }

    pub fn last_published(&self) -> Option<OutboundFrame> {
        self.last_published
    }

    fn publish(&mut self, frame: OutboundFrame, now: Instant) {
        let receivers = self.bus.publish(frame);
        trace!(x = frame.position.x, y = frame.position.y, receivers, "Position published");
        self.pending = None;
        self.last_published = Some(frame);
        self.last_published_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_shared::math::{GridPosition, GridSize};

    fn frame(x: i64) -> OutboundFrame {
        OutboundFrame {
            position: GridPosition { x, y: 0 },
            size: GridSize {
                width: 800,
                height: 600,
            },
        }
    }

    #[tokio::test]
    async fn report_rounds_and_publishes() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        let mut reporter = PositionReporter::new(bus, None);
        assert!(reporter.report(Position::new(10.6, 20.4), FieldSize::new(800.0, 600.0)));
        let sent = sub.recv().await.unwrap();
        assert_eq!(sent.position, GridPosition { x: 11, y: 20 });
        assert_eq!(sent.size, GridSize { width: 800, height: 600 });
    }

    #[test]
    fn throttle_parks_reports_and_poll_releases_latest() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        let mut reporter = PositionReporter::new(bus, Some(Duration::from_millis(100)));
        let start = Instant::now();

        assert!(reporter.report_at(frame(1), start));
        assert!(!reporter.report_at(frame(2), start + Duration::from_millis(30)));
        assert!(!reporter.report_at(frame(3), start + Duration::from_millis(60)));
        assert_eq!(reporter.pending(), Some(frame(3)));

        assert!(!reporter.poll(start + Duration::from_millis(90)));
        assert!(reporter.poll(start + Duration::from_millis(100)));
        assert_eq!(reporter.pending(), None);

        assert_eq!(sub.try_recv(), Some(frame(1)));
        assert_eq!(sub.try_recv(), Some(frame(3)));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn flush_sends_pending_inside_window() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        let mut reporter = PositionReporter::new(bus, Some(Duration::from_secs(60)));
        let start = Instant::now();
        reporter.report_at(frame(1), start);
        reporter.report_at(frame(2), start);
        assert!(reporter.flush());
        assert!(!reporter.flush());
        assert_eq!(sub.try_recv(), Some(frame(1)));
        assert_eq!(sub.try_recv(), Some(frame(2)));
        assert_eq!(reporter.last_published(), Some(frame(2)));
    }
}
