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

//! # user notifications
//!
//! The [Notifier] seam over outbound e-mail, and the background [Task]s that use it. The
//! implementation shipped today, [LogNotifier], just writes the message to the log; wiring-up an
//! SMTP relay is a matter of implementing the trait & swapping it into the background-task
//! [Context](crate::background_tasks::Context).

use std::time::Duration;

use async_trait::async_trait;
use snafu::Snafu;
use tracing::info;

use crate::{
    background_tasks::{self, Context, Task},
    entities::{UserEmail, Username},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to deliver mail to {to}: {source}"))]
    Delivery {
        to: UserEmail,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outbound e-mail, abstractly
#[async_trait]
pub trait Notifier {
    async fn send_email(&self, to: &UserEmail, subject: &str, body: &str) -> Result<()>;
}

/// A [Notifier] that writes to the log instead of the wire
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, to: &UserEmail, subject: &str, body: &str) -> Result<()> {
        info!("mail to {}: {} / {}", to, subject, body);
        Ok(())
    }
}

/// The welcome mail sent (off the hot path) on each successful login
pub struct SendWelcomeEmail {
    name: Username,
    email: UserEmail,
}

impl SendWelcomeEmail {
    pub fn new(name: Username, email: UserEmail) -> SendWelcomeEmail {
        SendWelcomeEmail { name, email }
    }
}

#[async_trait]
impl Task<Context> for SendWelcomeEmail {
    async fn exec(self: Box<Self>, context: Context) -> background_tasks::Result<()> {
        context
            .notifier
            .send_email(
                &self.email,
                "Welcome Back to Marquee!",
                &format!("Hi {}, successfully logged into your account.", self.name),
            )
            .await
            .map_err(background_tasks::Error::new)
    }
    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }
}
