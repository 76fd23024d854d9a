use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use confab_model::{Message, MessageId};
use tokio::sync::RwLock;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle hooks around message insertion and removal.
///
/// Hooks run outside the store lock and may read the engine, but must not call its
/// mutating methods: those wait on the mutation that is notifying them.
pub trait MessageObserver: Send + Sync {
    /// Runs before normalization; edits to `message` are what gets stored.
    fn before_insert<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, ()> {
        let _ = message;
        Box::pin(async {})
    }

    fn after_insert<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, ()> {
        let _ = message;
        Box::pin(async {})
    }

    fn messages_removed<'a>(&'a self, ids: &'a [MessageId]) -> BoxFuture<'a, ()> {
        let _ = ids;
        Box::pin(async {})
    }
}

#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn MessageObserver>>>,
}

impl ObserverRegistry {
    pub async fn register(&self, observer: Arc<dyn MessageObserver>) {
        self.observers.write().await.push(observer);
    }

    pub async fn count(&self) -> usize {
        self.observers.read().await.len()
    }

    // Hooks run against a copy; the registry lock is not held while they await.
    async fn current(&self) -> Vec<Arc<dyn MessageObserver>> {
        self.observers.read().await.clone()
    }

    pub async fn before_insert(&self, message: &mut Message) {
        for observer in self.current().await {
            observer.before_insert(message).await;
        }
    }

    pub async fn after_insert(&self, message: &Message) {
        for observer in self.current().await {
            observer.after_insert(message).await;
        }
    }

    pub async fn messages_removed(&self, ids: &[MessageId]) {
        if ids.is_empty() {
            return;
        }
        for observer in self.current().await {
            observer.messages_removed(ids).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use confab_model::GenericItem;

    use super::*;

    #[derive(Default)]
    struct Tagger {
        seen: Mutex<Vec<String>>,
    }

    impl MessageObserver for Tagger {
        fn before_insert<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                message.items.push(GenericItem::text("tagged"));
            })
        }

        fn messages_removed<'a>(&'a self, ids: &'a [MessageId]) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let mut seen = self.seen.lock().unwrap();
                seen.extend(ids.iter().map(|id| id.to_string()));
            })
        }
    }

    struct Silent;

    impl MessageObserver for Silent {}

    #[tokio::test]
    async fn hooks_run_for_every_registered_observer_in_order() {
        let registry = ObserverRegistry::default();
        let tagger = Arc::new(Tagger::default());
        registry.register(tagger.clone()).await;
        registry.register(Arc::new(Silent)).await;
        registry.register(tagger.clone()).await;
        assert_eq!(registry.count().await, 3);

        let mut message = Message::response("m1", Vec::new());
        registry.before_insert(&mut message).await;
        assert_eq!(message.items.len(), 2);

        registry.messages_removed(&[]).await;
        registry.messages_removed(&["m1".into()]).await;
        assert_eq!(*tagger.seen.lock().unwrap(), ["m1", "m1"]);
    }
}
