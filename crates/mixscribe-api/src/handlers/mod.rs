// SPDX-License-Identifier: GPL-3.0-or-later
pub mod recognize;
pub mod status;
