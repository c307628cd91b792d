// Copyright (C) 2026 Marquee Developers <devs@marquee.example>
//
// This file is part of marquee.
//
// marquee is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// marquee is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with marquee.  If not,
// see <http://www.gnu.org/licenses/>.

//! # media asset validation
//!
//! Movies may carry a poster image & a video file. marquee stores only references (paths into
//! whatever object store fronts the service); what it *does* enforce, at write time, is that the
//! referenced asset is of an accepted type (by extension) and, when the caller declares a size,
//! that it fits the limit.

use snafu::{ensure, OptionExt, Snafu};

/// Hard cap on any one asset
pub const MAX_ASSET_BYTES: u64 = 20 * 1024 * 1024;

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "mov", "avi"];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("File too large. Size should not exceed 20 MB."))]
    TooLarge { size: u64 },
    #[snafu(display("Unsupported file extension. Allowed: .jpg, .jpeg, .png, .webp"))]
    BadImageExtension { name: String },
    #[snafu(display("Unsupported video format. Allowed: .mp4, .mov, .avi"))]
    BadVideoExtension { name: String },
}

type Result<T> = std::result::Result<T, Error>;

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn check_size(size: Option<u64>) -> Result<()> {
    if let Some(size) = size {
        ensure!(size <= MAX_ASSET_BYTES, TooLargeSnafu { size });
    }
    Ok(())
}

/// Validate a poster reference: an accepted image extension & (if declared) an acceptable size
pub fn validate_poster(name: &str, size: Option<u64>) -> Result<()> {
    check_size(size)?;
    let ext = extension(name).context(BadImageExtensionSnafu {
        name: name.to_owned(),
    })?;
    ensure!(
        IMAGE_EXTENSIONS.contains(&ext.as_str()),
        BadImageExtensionSnafu {
            name: name.to_owned()
        }
    );
    Ok(())
}

/// Validate a video reference: an accepted video extension & (if declared) an acceptable size
pub fn validate_video(name: &str, size: Option<u64>) -> Result<()> {
    check_size(size)?;
    let ext = extension(name).context(BadVideoExtensionSnafu {
        name: name.to_owned(),
    })?;
    ensure!(
        VIDEO_EXTENSIONS.contains(&ext.as_str()),
        BadVideoExtensionSnafu {
            name: name.to_owned()
        }
    );
    Ok(())
}
