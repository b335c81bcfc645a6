//! Tag-based packet routing for the game-logic thread
//!
//! Handlers are registered per tag and invoked synchronously on the
//! calling thread; the dispatcher never queues or reorders anything.
//! Unmatched tags fall through to an optional default handler, and are
//! otherwise logged and dropped.

use log::{debug, warn};
use shared::{Packet, PacketMeta};
use std::collections::HashMap;

/// Handler invoked for a matching packet. Receives the shared handler
/// context, the sending client and the packet with its transport
/// metadata. Runs on the single consumer thread, so a handler is never
/// invoked concurrently with itself.
pub type PacketHandler<C> = Box<dyn FnMut(&mut C, u32, &Packet, &PacketMeta) + Send>;

/// Maps packet tags to handlers, with last-registration-wins semantics.
pub struct PacketDispatcher<C> {
    handlers: HashMap<String, PacketHandler<C>>,
    default_handler: Option<PacketHandler<C>>,
}

impl<C> PacketDispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: None,
        }
    }

    /// Registers a handler for a tag, replacing any previous one.
    pub fn register(&mut self, tag: impl Into<String>, handler: PacketHandler<C>) {
        let tag = tag.into();
        if self.handlers.insert(tag.clone(), handler).is_some() {
            debug!("Replaced existing handler for tag {:?}", tag);
        }
    }

    /// Installs the catch-all handler for unmatched tags.
    pub fn set_default(&mut self, handler: PacketHandler<C>) {
        self.default_handler = Some(handler);
    }

    /// Routes one packet by exact tag match. Falls back to the default
    /// handler; with neither registered the packet is dropped with a
    /// warning.
    pub fn handle(&mut self, ctx: &mut C, client_id: u32, packet: &Packet, meta: &PacketMeta) {
        if let Some(handler) = self.handlers.get_mut(&packet.tag) {
            handler(ctx, client_id, packet, meta);
        } else if let Some(default) = self.default_handler.as_mut() {
            default(ctx, client_id, packet, meta);
        } else {
            warn!(
                "No handler for packet tag {:?} from client {}, dropping",
                packet.tag, client_id
            );
        }
    }

    pub fn has_handler(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl<C> Default for PacketDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::tags;

    #[derive(Default)]
    struct TestContext {
        handled: Vec<String>,
        defaulted: u32,
    }

    fn meta() -> PacketMeta {
        PacketMeta::new(1000)
    }

    #[test]
    fn test_dispatches_to_registered_handler() {
        let mut dispatcher: PacketDispatcher<TestContext> = PacketDispatcher::new();
        dispatcher.register(
            tags::MOVE,
            Box::new(|ctx, client_id, packet, _| {
                ctx.handled.push(format!("{}:{}", client_id, packet.tag));
            }),
        );

        let mut ctx = TestContext::default();
        dispatcher.handle(&mut ctx, 3, &Packet::empty(tags::MOVE), &meta());

        assert_eq!(ctx.handled, vec!["3:MOVE"]);
        assert_eq!(ctx.defaulted, 0);
    }

    #[test]
    fn test_unmatched_tag_uses_default() {
        let mut dispatcher: PacketDispatcher<TestContext> = PacketDispatcher::new();
        dispatcher.set_default(Box::new(|ctx, _, _, _| ctx.defaulted += 1));

        let mut ctx = TestContext::default();
        dispatcher.handle(&mut ctx, 1, &Packet::empty("UNKNOWN"), &meta());

        assert_eq!(ctx.defaulted, 1);
        assert!(ctx.handled.is_empty());
    }

    #[test]
    fn test_no_handler_no_default_drops() {
        let mut dispatcher: PacketDispatcher<TestContext> = PacketDispatcher::new();
        let mut ctx = TestContext::default();

        // Must not panic, just log and drop
        dispatcher.handle(&mut ctx, 1, &Packet::empty("UNKNOWN"), &meta());
        assert!(ctx.handled.is_empty());
        assert_eq!(ctx.defaulted, 0);
    }

    #[test]
    fn test_last_registration_wins() {
        let mut dispatcher: PacketDispatcher<TestContext> = PacketDispatcher::new();
        dispatcher.register(
            tags::CHAT,
            Box::new(|ctx, _, _, _| ctx.handled.push("first".to_string())),
        );
        dispatcher.register(
            tags::CHAT,
            Box::new(|ctx, _, _, _| ctx.handled.push("second".to_string())),
        );
        assert_eq!(dispatcher.handler_count(), 1);

        let mut ctx = TestContext::default();
        dispatcher.handle(&mut ctx, 1, &Packet::empty(tags::CHAT), &meta());
        assert_eq!(ctx.handled, vec!["second"]);
    }

    #[test]
    fn test_exact_match_only() {
        let mut dispatcher: PacketDispatcher<TestContext> = PacketDispatcher::new();
        dispatcher.register(
            tags::MOVE,
            Box::new(|ctx, _, _, _| ctx.handled.push("move".to_string())),
        );
        dispatcher.set_default(Box::new(|ctx, _, _, _| ctx.defaulted += 1));

        let mut ctx = TestContext::default();
        dispatcher.handle(&mut ctx, 1, &Packet::empty("move"), &meta());
        dispatcher.handle(&mut ctx, 1, &Packet::empty("MOVEX"), &meta());

        assert!(ctx.handled.is_empty());
        assert_eq!(ctx.defaulted, 2);
        assert!(dispatcher.has_handler(tags::MOVE));
        assert!(!dispatcher.has_handler("move"));
    }

    #[test]
    fn test_handler_sees_payload_and_meta() {
        let mut dispatcher: PacketDispatcher<TestContext> = PacketDispatcher::new();
        dispatcher.register(
            tags::KILL,
            Box::new(|ctx, _, packet, meta| {
                ctx.handled
                    .push(format!("{}b@{}", packet.payload.len(), meta.received_at));
            }),
        );

        let mut ctx = TestContext::default();
        let packet = Packet::new(tags::KILL, vec![0; 8]);
        dispatcher.handle(&mut ctx, 2, &packet, &PacketMeta::new(555));

        assert_eq!(ctx.handled, vec!["8b@555"]);
    }
}
