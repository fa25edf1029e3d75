// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Field names shared by log events and metric attributes.

pub(crate) const CACHE_NAME: &str = "cache.name";
pub(crate) const CACHE_OPERATION_NAME: &str = "cache.operation";
pub(crate) const CACHE_ACTIVITY_NAME: &str = "cache.activity";
