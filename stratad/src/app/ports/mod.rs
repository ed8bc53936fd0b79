// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod catalog;
pub mod clock;
pub mod coordination;
pub mod credentials;
pub mod launch_queue;
pub mod notifications;
pub mod registry;
pub mod remote_cluster;
pub mod status_bus;

pub use catalog::CatalogPort;
pub use clock::ClockPort;
pub use coordination::CoordinationPort;
pub use credentials::CredentialStorePort;
pub use launch_queue::{Delivery, LaunchKind, LaunchMessage, LaunchQueuePort};
pub use notifications::{JobNotification, NotificationSourcePort};
pub use registry::RegistryPort;
pub use remote_cluster::{
    ByteReader, ByteWriter, ClusterAccess, ClusterSpec, CommandOutput, RemoteCluster, RemoteClusterFactory,
    SubmissionOutput,
};
pub use status_bus::{StatusEvent, StatusPublisherPort};
