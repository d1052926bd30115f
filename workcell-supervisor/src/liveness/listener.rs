//! Dependency callbacks

use async_trait::async_trait;
use workcell_core::dto::ErrorReport;

use super::tracker::DependencyEvent;

/// Reactions of a node to its dependencies
///
/// Every node that has dependencies implements all four callbacks.
#[async_trait]
pub trait DependencyListener: Send {
    /// A single dependency came online (`true`) or went offline (`false`)
    async fn on_dependency_change(&mut self, name: &str, online: bool);

    /// The last missing dependency came back
    async fn on_all_dependencies_online(&mut self);

    /// At least one dependency is missing after all were online
    async fn on_dependencies_offline(&mut self, missing: &[String]);

    /// A dependency published an error
    async fn on_error(&mut self, report: ErrorReport);
}

/// Hands tracker events to a listener in order
pub async fn deliver<L>(events: Vec<DependencyEvent>, listener: &mut L)
where
    L: DependencyListener + ?Sized,
{
    for event in events {
        match event {
            DependencyEvent::Changed { name, online } => {
                listener.on_dependency_change(&name, online).await
            }
            DependencyEvent::AllOnline => listener.on_all_dependencies_online().await,
            DependencyEvent::Offline { missing } => {
                listener.on_dependencies_offline(&missing).await
            }
        }
    }
}
