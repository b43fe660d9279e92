// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod balancer;
pub mod config;
pub mod error;
pub mod header;
pub mod id;
pub mod listener;
pub mod metrics;
pub mod policy;
pub mod service;
pub mod target;

pub mod prelude {
	pub use crate::error::{ConfigError, DispatchError, ListenerBindError};
	pub use std::sync::Arc;
	pub use std::time::{Duration, Instant};
	pub use tracing::{debug, error, info, warn};
}
