pub mod backend;
pub mod database;
pub mod kubernetes;

pub use backend::{ClusterBackend, HttpCheck};
pub use database::{SqlDatabaseInspector, inspector_for};
pub use kubernetes::{ClusterConfig, KubeClient, KubernetesWorkloadController};
