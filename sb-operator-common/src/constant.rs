// SPDX-FileCopyrightText: 2025 Timothy Pogue
//
// SPDX-License-Identifier: ISC

pub const APP_NAME: &str = "service-binding-operator";
pub const ENV_PREFIX: &str = "SB_OPERATOR";
