use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use archivist_core::SchedulerResult;
use archivist_domain::events::{DomainEvent, SchedulerEvent};
use archivist_domain::ports::EventPublisher;

/// 事件总线配置
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// 广播通道容量，慢订阅者超过该积压量会丢失旧事件
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: 1024, // 约为一次派发周期的最大事件量
        }
    }
}

/// 基于tokio broadcast的进程内事件总线
///
/// 没有订阅者时发布直接丢弃，不视为错误。
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl BroadcastEventBus {
    pub fn new(config: Option<EventBusConfig>) -> Self {
        let config = config.unwrap_or_default();
        let (sender, _) = broadcast::channel(config.capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventBus {
    async fn publish(&self, event: SchedulerEvent) -> SchedulerResult<()> {
        trace!("发布事件: {} {}", event.event_type(), event.aggregate_id());
        if self.sender.send(event).is_err() {
            debug!("事件总线没有订阅者，事件已丢弃");
        }
        Ok(())
    }
}
