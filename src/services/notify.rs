//! Notification fan-out
//!
//! Best-effort delivery: a domain write must not fail because its
//! notification could not be recorded, so these helpers log and
//! swallow storage errors.

use bson::{doc, oid::ObjectId};
use tracing::warn;

use crate::db::mongo::MongoClient;
use crate::db::schemas::{
    NotificationDoc, Role, UserDoc, NOTIFICATION_COLLECTION, USER_COLLECTION,
};
use crate::types::AppError;

/// Insert one notification; failures are logged and swallowed
pub async fn deliver(mongo: &MongoClient, notification: NotificationDoc) {
    let result = async {
        let collection = mongo
            .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
            .await?;
        collection.insert_one(notification).await
    }
    .await;

    if let Err(err) = result {
        warn!(error = %err, "failed to record notification");
    }
}

/// Insert a batch of notifications; failures are logged and swallowed
pub async fn deliver_all(mongo: &MongoClient, notifications: Vec<NotificationDoc>) {
    if notifications.is_empty() {
        return;
    }
    let count = notifications.len();
    let result = async {
        let collection = mongo
            .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
            .await?;
        collection.insert_many(notifications).await
    }
    .await;

    if let Err(err) = result {
        warn!(error = %err, count, "failed to record notification batch");
    }
}

/// Ids of all active users holding the given role
pub async fn active_user_ids(mongo: &MongoClient, role: Role) -> Result<Vec<ObjectId>, AppError> {
    let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let found = users
        .find_many(doc! { "role": role.as_str(), "is_active": true })
        .await?;
    Ok(found.into_iter().filter_map(|user| user._id).collect())
}

/// Fan one notification out to every active user holding the role
pub async fn broadcast_to_role<F>(mongo: &MongoClient, role: Role, build: F)
where
    F: Fn(ObjectId) -> NotificationDoc,
{
    match active_user_ids(mongo, role).await {
        Ok(ids) => {
            let batch: Vec<NotificationDoc> = ids.into_iter().map(build).collect();
            deliver_all(mongo, batch).await;
        }
        Err(err) => {
            warn!(error = %err, role = role.as_str(), "failed to load broadcast recipients");
        }
    }
}
