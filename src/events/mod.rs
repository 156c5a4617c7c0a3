use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: String, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Request context for activity logging (IP, User-Agent)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    /// The current/new state of the entity
    #[serde(rename = "new")]
    pub current: Value,
    /// The previous state (for update/delete operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    pub severity: Severity,
}

/// Publish an activity event for `entity`, named `<entity_type>.<action>`.
///
/// Fire and forget: a closed bus or a serialization failure never reaches the
/// caller.
pub fn log_activity<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        context,
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        format!("{}.{}", T::entity_type(), action),
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

fn describe(name: &str) -> &'static str {
    match name {
        "group.created" => "Group created",
        "group.updated" => "Group updated",
        "group.deleted" => "Group deleted",
        "group_member.added" => "User added to group",
        "group_member.removed" => "User removed from group",
        "group_permission.attached" => "Permission attached to group",
        "group_permission.detached" => "Permission detached from group",
        "group_role.attached" => "Role attached to group",
        "group_role.detached" => "Role detached from group",
        "role.created" => "Role created",
        "role.updated" => "Role updated",
        "role.deleted" => "Role deleted",
        "role_permission.attached" => "Permission attached to role",
        "role_permission.detached" => "Permission detached from role",
        "permission.created" => "Permission created",
        "permission.updated" => "Permission updated",
        "permission.deleted" => "Permission deleted",
        "user_role.assigned" => "Role assigned to user",
        "user_role.revoked" => "Role revoked from user",
        "user.registered" => "New user registered",
        _ => "System event",
    }
}

/// Project bus events into `activity_log` until the bus closes.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("Activity listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let name = event.get("name").and_then(Value::as_str).unwrap_or("unknown");
        let actor_id = event.get("actor_id").and_then(Value::as_str);
        let subject_id = event.get("subject_id").and_then(Value::as_str);
        let occurred_at = event
            .get("occurred_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let severity = event
            .get("payload")
            .and_then(|p| p.get("severity"))
            .and_then(Value::as_str)
            .unwrap_or(Severity::default().as_str());
        let properties = serde_json::to_string(&event).unwrap_or_default();

        let result = sqlx::query(
            r#"
            INSERT INTO activity_log (id, event_name, description, actor_id, subject_id, occurred_at, properties, severity)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(describe(name))
        .bind(actor_id)
        .bind(subject_id)
        .bind(occurred_at)
        .bind(&properties)
        .bind(severity)
        .execute(&pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to save activity log: {}", e);
        }
    }
    tracing::info!("Activity listener stopped");
}
