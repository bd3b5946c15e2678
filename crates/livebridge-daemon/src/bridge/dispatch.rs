//! Delivery of one post to one target
//!
//! Every call walks the same fixed sequence: convert, load the existing sync
//! record, classify, perform the target call, run extras, persist, clean up
//! converter images. Errors from the target, storage or converter propagate
//! to the caller, which decides about retrying.

use crate::component::{ComponentError, ComponentRegistry, ErasedConverter, ErasedTarget, Post, PostAction};
use crate::storage::ErasedStorage;
use livebridge_core::SyncRecord;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs the delivery sequence against the shared storage client
#[derive(Clone)]
pub struct Dispatcher {
    storage: Arc<dyn ErasedStorage>,
    registry: Arc<ComponentRegistry>,
}

impl Dispatcher {
    pub fn new(storage: Arc<dyn ErasedStorage>, registry: Arc<ComponentRegistry>) -> Self {
        Self { storage, registry }
    }

    pub fn storage(&self) -> &Arc<dyn ErasedStorage> {
        &self.storage
    }

    /// Deliver `post` to `target` and return the action taken.
    ///
    /// Empty results from the target are logged and end the attempt without
    /// an error. Converter image cleanup runs whenever a conversion happened,
    /// whatever the outcome, and never fails the dispatch.
    pub async fn dispatch(
        &self,
        target: &dyn ErasedTarget,
        post: &mut Post,
    ) -> Result<PostAction, ComponentError> {
        let converter = self
            .registry
            .converter(post.source_type(), target.target_type());

        let mut converted = false;
        let result = self
            .deliver(target, post, converter.as_deref(), &mut converted)
            .await;

        if let Some(converter) = converter.filter(|_| converted) {
            if let Err(e) = converter.remove_images(&post.images).await {
                error!("Error when deleting images of post {}: {}", post.id(), e);
            }
        }

        result
    }

    async fn deliver(
        &self,
        target: &dyn ErasedTarget,
        post: &mut Post,
        converter: Option<&dyn ErasedConverter>,
        converted: &mut bool,
    ) -> Result<PostAction, ComponentError> {
        let target_id = target.target_id();

        if let Some(converter) = converter {
            let conversion = converter.convert(post.data()).await?;
            *converted = true;
            post.content = conversion.content;
            post.images = conversion.images;
            debug!("Conversion result for {}: {}", post.id(), post.content);

            if post.content.is_empty() && !post.is_deleted() {
                warn!("Empty text, post {} got ignored for {}", post.id(), target_id);
                return Ok(PostAction::Ignore);
            }
        }

        let existing = self.storage.get_post(target_id, post.id()).await?;
        post.set_existing(existing);
        post.set_target_id(target_id);

        let action = post.action();
        info!("Post action: {} - {} - {}", action, target_id, post.id());

        match action {
            PostAction::Ignore => return Ok(action),
            PostAction::Create => {
                let doc = target.post_item(post).await?.filter(|d| !d.is_empty());
                debug!("Target create result: {:?}", doc);
                if doc.is_none() {
                    error!("Post {} wasn't saved in {}", post.id(), target_id);
                }
                post.set_target_doc(doc.unwrap_or_default());
            }
            PostAction::Update => {
                let doc = target.update_item(post).await?.filter(|d| !d.is_empty());
                debug!("Target update result: {:?}", doc);
                if doc.is_none() {
                    error!("Target update failed for {} on {}", post.id(), target_id);
                }
                post.set_target_doc(doc.unwrap_or_default());
                info!("Updated post [{}] on {}", post.id(), target_id);
            }
            PostAction::Delete => {
                if target.delete_item(post).await? {
                    self.storage.delete_post(target_id, post.id()).await?;
                    info!("Deleted post [{}] on {}", post.id(), target_id);
                } else {
                    error!("Deleting post failed: [{}] on {}", post.id(), target_id);
                }
                return Ok(action);
            }
        }

        if let Some(extra) = target.handle_extras(post).await? {
            if !extra.is_empty() {
                post.set_target_doc(extra);
            }
        }

        let record = SyncRecord {
            target_id: target_id.to_string(),
            post_id: post.id().to_string(),
            source_id: post.source_id().to_string(),
            text: post.content.clone(),
            sticky: post.is_sticky(),
            created: post.created(),
            updated: post.updated(),
            target_doc: post.target_doc(),
        };
        match action {
            PostAction::Create => self.storage.insert_post(&record).await?,
            PostAction::Update => self.storage.update_post(&record).await?,
            PostAction::Ignore | PostAction::Delete => {}
        }

        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{
        MockConverter, MockConverterCall, MockPost, MockTarget, MockTargetCall,
    };
    use crate::storage::{MockStorage, MockStorageCall};
    use serde_json::json;
    use std::path::PathBuf;
    use tracing_test::traced_test;

    fn dispatcher(storage: &MockStorage, registry: ComponentRegistry) -> Dispatcher {
        Dispatcher::new(Arc::new(storage.clone()), Arc::new(registry))
    }

    fn is_insert(call: &MockStorageCall) -> bool {
        matches!(call, MockStorageCall::InsertPost { .. })
    }

    fn is_update(call: &MockStorageCall) -> bool {
        matches!(call, MockStorageCall::UpdatePost { .. })
    }

    fn is_delete(call: &MockStorageCall) -> bool {
        matches!(call, MockStorageCall::DeletePost { .. })
    }

    // ========================================================================
    // Action paths
    // ========================================================================

    #[tokio::test]
    async fn test_unknown_post_is_created_and_persisted_once() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());
        let target = MockTarget::new("t1");
        let mut post = Post::new(MockPost::new("p1").item());

        let action = dispatcher.dispatch(&target, &mut post).await.unwrap();

        assert_eq!(action, PostAction::Create);
        assert_eq!(
            target.get_calls(),
            vec![
                MockTargetCall::PostItem("p1".to_string()),
                MockTargetCall::HandleExtras("p1".to_string()),
            ]
        );
        assert_eq!(storage.count(is_insert), 1);
        assert_eq!(storage.count(is_update), 0);

        let record = dispatcher.storage().get_post("t1", "p1").await.unwrap().unwrap();
        assert_eq!(record.target_doc.get("id"), Some(&json!("p1")));
        assert_eq!(record.source_id, "source-1");
    }

    #[tokio::test]
    async fn test_known_deleted_post_is_deleted() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());
        let target = MockTarget::new("t1");

        let mut create = Post::new(MockPost::new("p1").item());
        dispatcher.dispatch(&target, &mut create).await.unwrap();
        target.call_log.lock().unwrap().clear();
        storage.call_log.lock().unwrap().clear();

        let mut delete = Post::new(MockPost::new("p1").deleted().item());
        let action = dispatcher.dispatch(&target, &mut delete).await.unwrap();

        assert_eq!(action, PostAction::Delete);
        assert_eq!(
            target.get_calls(),
            vec![MockTargetCall::DeleteItem("p1".to_string())]
        );
        assert_eq!(storage.count(is_delete), 1);
        assert_eq!(storage.count(is_insert), 0);
        assert_eq!(storage.count(is_update), 0);
    }

    #[tokio::test]
    async fn test_create_then_delete_leaves_no_record() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());
        let target = MockTarget::new("t1");

        let mut create = Post::new(MockPost::new("p1").item());
        dispatcher.dispatch(&target, &mut create).await.unwrap();
        assert_eq!(storage.post_count(), 1);

        let mut delete = Post::new(MockPost::new("p1").deleted().item());
        dispatcher.dispatch(&target, &mut delete).await.unwrap();
        assert_eq!(storage.post_count(), 0);
    }

    #[tokio::test]
    async fn test_known_updated_post_is_updated() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());
        let target = MockTarget::new("t1");

        let mut create = Post::new(MockPost::new("p1").item());
        dispatcher.dispatch(&target, &mut create).await.unwrap();

        let mut update = Post::new(MockPost::new("p1").updated().item());
        let action = dispatcher.dispatch(&target, &mut update).await.unwrap();

        assert_eq!(action, PostAction::Update);
        assert_eq!(storage.count(is_update), 1);
        assert_eq!(storage.count(is_insert), 1);
    }

    #[tokio::test]
    async fn test_known_unchanged_post_is_ignored() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());
        let target = MockTarget::new("t1");

        let mut create = Post::new(MockPost::new("p1").item());
        dispatcher.dispatch(&target, &mut create).await.unwrap();

        let mut again = Post::new(MockPost::new("p1").item());
        let action = dispatcher.dispatch(&target, &mut again).await.unwrap();

        assert_eq!(action, PostAction::Ignore);
        assert_eq!(target.attempt_count(), 1);
        assert_eq!(storage.count(is_insert), 1);
    }

    #[tokio::test]
    async fn test_unknown_deleted_post_is_ignored() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());
        let target = MockTarget::new("t1");

        let mut post = Post::new(MockPost::new("p1").deleted().item());
        let action = dispatcher.dispatch(&target, &mut post).await.unwrap();

        assert_eq!(action, PostAction::Ignore);
        assert!(target.get_calls().is_empty());
    }

    // ========================================================================
    // Results and extras
    // ========================================================================

    #[tokio::test]
    async fn test_extras_document_overrides_create_result() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());
        let target = MockTarget::new("t1").with_extras(json!({"id": "p1", "pinned": true}));

        let mut post = Post::new(MockPost::new("p1").sticky().item());
        dispatcher.dispatch(&target, &mut post).await.unwrap();

        let record = dispatcher.storage().get_post("t1", "p1").await.unwrap().unwrap();
        assert_eq!(record.target_doc.get("pinned"), Some(&json!(true)));
        assert!(record.sticky);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_empty_create_result_is_logged_not_raised() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());
        let target = MockTarget::new("t1").with_empty_results();

        let mut post = Post::new(MockPost::new("p1").item());
        let action = dispatcher.dispatch(&target, &mut post).await.unwrap();

        assert_eq!(action, PostAction::Create);
        assert!(logs_contain("wasn't saved"));
        let record = dispatcher.storage().get_post("t1", "p1").await.unwrap().unwrap();
        assert!(record.target_doc.is_empty());
    }

    #[tokio::test]
    async fn test_empty_update_result_keeps_previous_document() {
        let storage = MockStorage::new();
        let registry = ComponentRegistry::new();
        let dispatcher = dispatcher(&storage, registry);

        let mut create = Post::new(MockPost::new("p1").item());
        dispatcher
            .dispatch(&MockTarget::new("t1"), &mut create)
            .await
            .unwrap();

        let failing = MockTarget::new("t1").with_empty_results();
        let mut update = Post::new(MockPost::new("p1").updated().item());
        dispatcher.dispatch(&failing, &mut update).await.unwrap();

        let record = dispatcher.storage().get_post("t1", "p1").await.unwrap().unwrap();
        assert_eq!(record.target_doc.get("id"), Some(&json!("p1")));
    }

    #[tokio::test]
    async fn test_failed_target_delete_keeps_record() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());

        let mut create = Post::new(MockPost::new("p1").item());
        dispatcher
            .dispatch(&MockTarget::new("t1"), &mut create)
            .await
            .unwrap();

        let refusing = MockTarget::new("t1").with_delete_result(false);
        let mut delete = Post::new(MockPost::new("p1").deleted().item());
        let action = dispatcher.dispatch(&refusing, &mut delete).await.unwrap();

        assert_eq!(action, PostAction::Delete);
        assert_eq!(storage.count(is_delete), 0);
        assert_eq!(storage.post_count(), 1);
    }

    // ========================================================================
    // Errors
    // ========================================================================

    #[tokio::test]
    async fn test_target_errors_propagate() {
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());

        let mut post = Post::new(MockPost::new("p1").item());
        let err = dispatcher
            .dispatch(&MockTarget::new("t1").failing_times(1), &mut post)
            .await
            .unwrap_err();
        assert!(!err.is_permanent());

        let mut post = Post::new(MockPost::new("p1").item());
        let err = dispatcher
            .dispatch(&MockTarget::new("t1").invalid(), &mut post)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(storage.count(is_insert), 0);
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let storage = MockStorage::new().failing_writes();
        let dispatcher = dispatcher(&storage, ComponentRegistry::new());

        let mut post = Post::new(MockPost::new("p1").item());
        let err = dispatcher
            .dispatch(&MockTarget::new("t1"), &mut post)
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentError::Storage(_)));
    }

    // ========================================================================
    // Conversion
    // ========================================================================

    fn registry_with(converter: &MockConverter) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register_converter("mock", "mock", Arc::new(converter.clone()));
        registry
    }

    #[tokio::test]
    async fn test_converted_content_is_delivered_and_images_cleaned() {
        let images = vec![PathBuf::from("/tmp/a.jpeg")];
        let converter = MockConverter::new("converted text").with_images(images.clone());
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, registry_with(&converter));
        let target = MockTarget::new("t1");

        let mut post = Post::new(MockPost::new("p1").item());
        dispatcher.dispatch(&target, &mut post).await.unwrap();

        assert_eq!(post.content, "converted text");
        assert_eq!(
            converter.get_calls(),
            vec![MockConverterCall::Convert, MockConverterCall::RemoveImages(images)]
        );
        let record = dispatcher.storage().get_post("t1", "p1").await.unwrap().unwrap();
        assert_eq!(record.text, "converted text");
    }

    #[tokio::test]
    async fn test_empty_conversion_ignores_post() {
        let converter = MockConverter::new("");
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, registry_with(&converter));
        let target = MockTarget::new("t1");

        let mut post = Post::new(MockPost::new("p1").item());
        let action = dispatcher.dispatch(&target, &mut post).await.unwrap();

        assert_eq!(action, PostAction::Ignore);
        assert!(target.get_calls().is_empty());
        assert!(storage.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_conversion_of_deleted_post_still_deletes() {
        let storage = MockStorage::new();
        let target = MockTarget::new("t1");

        let plain = dispatcher(&storage, ComponentRegistry::new());
        let mut create = Post::new(MockPost::new("p1").item());
        plain.dispatch(&target, &mut create).await.unwrap();

        let converter = MockConverter::new("");
        let converting = dispatcher(&storage, registry_with(&converter));
        let mut delete = Post::new(MockPost::new("p1").deleted().item());
        let action = converting.dispatch(&target, &mut delete).await.unwrap();

        assert_eq!(action, PostAction::Delete);
        assert_eq!(storage.post_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_not_propagated() {
        let converter = MockConverter::new("text").with_cleanup_error("busy");
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, registry_with(&converter));

        let mut post = Post::new(MockPost::new("p1").item());
        let action = dispatcher
            .dispatch(&MockTarget::new("t1"), &mut post)
            .await
            .unwrap();
        assert_eq!(action, PostAction::Create);
    }

    #[tokio::test]
    async fn test_converter_error_propagates() {
        let converter = MockConverter::new("text").with_error("bad markup");
        let storage = MockStorage::new();
        let dispatcher = dispatcher(&storage, registry_with(&converter));

        let mut post = Post::new(MockPost::new("p1").item());
        let err = dispatcher
            .dispatch(&MockTarget::new("t1"), &mut post)
            .await
            .unwrap_err();
        assert!(matches!(err, ComponentError::Converter { .. }));
        assert_eq!(converter.get_calls(), vec![MockConverterCall::Convert]);
    }
}
