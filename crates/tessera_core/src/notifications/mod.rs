//! Change notifications.
//!
//! Observing an object or collection registers an engine callback and
//! returns a [`ChangeStream`]. The stream starts with an `Initial` event;
//! each committed change is decoded, translated into a typed event on the
//! realm's [`Scheduler`] and pushed into a bounded channel.
//!
//! - updates with an empty change set are suppressed
//! - a `Deleted` event is the last one on its stream
//! - a consumer that falls behind the buffer has its stream closed with
//!   [`crate::CoreError::NotificationOverflow`] and the registration released

mod scheduler;
mod stream;

#[cfg(feature = "tokio")]
pub use scheduler::TokioScheduler;
pub use scheduler::{ImmediateScheduler, Scheduler, Task, ThreadScheduler};
pub use stream::{ChangeStream, NotificationToken};

use crate::changeset::ChangeSet;
use crate::error::{CoreError, CoreResult};
use crate::object::Object;
use crate::realm::RealmShared;
use std::sync::Arc;
use stream::Delivery;
use tessera_codec::{ChangeBatch, RawChangeBatch};
use tessera_engine::{ChangeCallback, CollectionPtr, EngineResult, ListenerId};
use tracing::debug;

/// A change to an observed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectChange {
    /// The object as it was when observation started.
    Initial,
    /// Some properties changed.
    Updated {
        /// Names of the changed properties.
        changed_fields: Vec<String>,
    },
    /// The object was deleted. No further events follow.
    Deleted,
}

/// A change to an observed collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionChange<C> {
    /// The collection as it was when observation started.
    Initial,
    /// The collection changed.
    Updated(C),
    /// The collection's parent object was deleted. No further events follow.
    Deleted,
}

/// Registers a listener delivering through the realm's scheduler.
fn subscribe<E, T, R>(
    realm: &Arc<RealmShared>,
    initial: E,
    translate: T,
    register: R,
) -> CoreResult<ChangeStream<E>>
where
    E: Send + 'static,
    T: Fn(ChangeBatch) -> CoreResult<Delivery<E>> + Send + Sync + 'static,
    R: FnOnce(ChangeCallback) -> EngineResult<ListenerId>,
{
    let token = NotificationToken::new(Arc::downgrade(&realm.engine));
    let (sink, stream) = stream::channel(token.clone(), realm.config.notification_buffer);
    ChangeStream::push_initial(&sink, initial);

    let sink = Arc::new(sink);
    let translate = Arc::new(translate);
    let scheduler = Arc::clone(&realm.scheduler);
    let callback: ChangeCallback = Box::new(move |raw: RawChangeBatch| {
        let sink = Arc::clone(&sink);
        let translate = Arc::clone(&translate);
        scheduler.schedule(Box::new(move || {
            let outcome = raw
                .decode()
                .map_err(CoreError::from)
                .and_then(|batch| translate(batch));
            sink.deliver(outcome);
        }));
    });
    let listener = register(callback)?;
    token.bind(listener);
    debug!(listener = listener.as_u64(), "registered listener");
    Ok(stream)
}

/// Observes one managed object.
pub(crate) fn observe_object(object: &Object) -> CoreResult<ChangeStream<ObjectChange>> {
    let managed = object.require_managed()?;
    if !object.is_valid() {
        return Err(CoreError::invalid_object());
    }
    let class = Arc::clone(&managed.class);
    let engine = Arc::clone(&managed.realm.engine);
    let ptr = managed.ptr;
    subscribe(
        &managed.realm,
        ObjectChange::Initial,
        move |batch| match batch {
            ChangeBatch::Object(changes) if changes.deleted => Ok(Delivery::Last(ObjectChange::Deleted)),
            ChangeBatch::Object(changes) => {
                let changed_fields: Vec<String> = changes
                    .modified_properties
                    .iter()
                    .filter_map(|key| class.property_by_key(*key))
                    .map(|property| property.name.clone())
                    .collect();
                if changed_fields.is_empty() {
                    return Ok(Delivery::Skip);
                }
                Ok(Delivery::Event(ObjectChange::Updated { changed_fields }))
            }
            _ => Err(CoreError::from(tessera_codec::CodecError::decoding_failed(
                "expected an object change batch",
            ))),
        },
        |callback| engine.add_object_listener(&ptr, callback),
    )
}

/// Observes one managed collection.
pub(crate) fn observe_collection<C: ChangeSet>(
    realm: &Arc<RealmShared>,
    ptr: &CollectionPtr,
) -> CoreResult<ChangeStream<CollectionChange<C>>> {
    let engine = Arc::clone(&realm.engine);
    subscribe(
        realm,
        CollectionChange::Initial,
        |batch| {
            let changes = C::from_batch(batch)?;
            Ok(if changes.is_deleted() {
                Delivery::Last(CollectionChange::Deleted)
            } else if changes.is_empty() {
                Delivery::Skip
            } else {
                Delivery::Event(CollectionChange::Updated(changes))
            })
        },
        |callback| engine.add_collection_listener(ptr, callback),
    )
}
