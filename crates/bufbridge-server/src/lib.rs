// ABOUTME: Library root for the demo server exposing the echo service for integration testing
// ABOUTME: Lets tests/ build the same bridge the binary serves
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

pub mod echo;
