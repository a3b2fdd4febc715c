//! Pool - メンバーシップ、選挙、ノード間通信

pub mod communication;
pub mod coordinator;
pub mod election;
pub mod info;

pub use self::communication::CommunicationLayer;
pub use self::coordinator::PoolCoordinator;
pub use self::election::ElectionCache;
pub use self::info::PoolInfo;
