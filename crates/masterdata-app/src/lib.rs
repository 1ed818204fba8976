// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod binding;
pub mod cache;
pub mod dispatch;
pub mod edit;
pub mod export;
pub mod ids;
pub mod layout;
pub mod model;
pub mod state;

pub use binding::*;
pub use cache::*;
pub use dispatch::*;
pub use edit::*;
pub use export::*;
pub use ids::*;
pub use layout::*;
pub use model::*;
pub use state::*;
