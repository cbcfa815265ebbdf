//! Core packet-analysis pipeline of a multi-interface network diagnostic
//! tool: ingests parsed packet records, reconstructs bidirectional flows,
//! detects TCP retransmission/out-of-order/handshake RTT, maintains
//! rolling per-interface metrics, and derives bottleneck/loss/comparison/
//! alert signals on top.

pub mod alert;
pub mod api;
pub mod bottleneck;
pub mod capture;
pub mod comparator;
pub mod config;
pub mod error;
pub mod flow;
pub mod flow_tracker;
pub mod loss_localizer;
pub mod metrics;
pub mod metrics_store;
pub mod packet;
pub mod pcap_io;
pub mod pipeline;
pub mod ring;

pub use alert::{Alert, AlertEngine, AlertRule, AlertSeverity};
pub use bottleneck::{Bottleneck, BottleneckDetector, HealthReport};
pub use capture::{CaptureQueue, CaptureSource};
pub use comparator::{ComparisonResult, InterfaceComparator};
pub use config::PipelineConfig;
pub use error::{NetdiagError, StartupError};
pub use flow::{Flow, FlowEvent, FlowKey, TcpFlow, TcpState};
pub use flow_tracker::FlowTracker;
pub use loss_localizer::{LossLocalizer, LossLocation};
pub use metrics::{InterfaceMetrics, MetricsSnapshot};
pub use metrics_store::MetricsStore;
pub use packet::{L4Protocol, PacketRecord, Protocol};
pub use pipeline::{PacketPipeline, PipelineDebugInfo};
