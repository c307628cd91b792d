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

//! # marquee metrics
//!
//! marquee uses [OpenTelemetry] to collect metrics. OTel advises that instruments be re-used
//! rather than created at each collection site, which raises the question of where to keep them;
//! I'd prefer not to litter the state type with dozens of fields of type `Counter<u64>` and so
//! on, nor to maintain a centralized list of metric names that every module has to be edited
//! into.
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! This module instead uses David Tolnay's [inventory] crate: each collection site registers its
//! metric at file scope:
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("cache.hits", Sort::IntegralCounter) }
//! // ...
//! counter_add!(state.instruments, "cache.hits", 1, &[]);
//! ```
//!
//! The [Instruments] constructor walks the inventory, checks for name clashes & pre-builds all
//! the instruments, so `add`/`record` take `&self` and the whole thing can live in an `Arc`.
//!
//! Failure to look up a metric by name, or looking it up at the wrong type, panics: those are
//! logic errors that would be compile-time errors in a richer type system.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge},
    KeyValue,
};

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to `Counter<u64>`
    IntegralCounter,
    /// `Gauge<u64>`
    IntegralGauge,
    // more later?
}

/// The type of thing being inventoried
///
/// Register a metric by name & type using
///
/// ```ignore
/// inventory::submit!{metrics::Registration::new("authn.successes", Sort::IntegralCounter)}
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> String {
        self.name.to_string()
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

pub fn check_metric_registrations() {
    let mut names: HashSet<String> = HashSet::new();
    IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
        if names.contains(&reg.name()) {
            panic!("The metric name {} was used twice", reg.name());
        }
        names.insert(reg.name());
    });
}

enum Instrument {
    CounterU64(Counter<u64>),
    GaugeU64(Gauge<u64>),
}

/// Container for OTel instruments
pub struct Instruments {
    meter: opentelemetry::metrics::Meter,
    map: HashMap<String, Instrument>,
}

impl Instruments {
    pub fn new(prefix: &'static str) -> Instruments {
        let mut m: HashMap<String, Instrument> = HashMap::new();
        let meter = global::meter(prefix);
        IntoIterator::into_iter(inventory::iter::<Registration>).for_each(|reg| {
            let name = reg.name();
            match m.entry(reg.name()) {
                Entry::Occupied(_occupied_entry) => {
                    panic!("The metric name {} was used twice", name)
                }
                Entry::Vacant(vacant_entry) => {
                    vacant_entry.insert(match reg.sort() {
                        Sort::IntegralCounter => {
                            Instrument::CounterU64(meter.u64_counter(name).build())
                        }
                        Sort::IntegralGauge => Instrument::GaugeU64(meter.u64_gauge(name).build()),
                    });
                }
            }
        });

        Instruments { meter, map: m }
    }
    pub fn meter(&self) -> &opentelemetry::metrics::Meter {
        &self.meter
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        if let Some(Instrument::CounterU64(c)) = self.map.get(name) {
            c.add(count, attributes);
        } else {
            panic!("{} does not name a counter", name);
        }
    }
    // panics if `name` doesn't name a gauge
    pub fn recordu(&self, name: &str, value: u64, attributes: &[KeyValue]) {
        if let Some(Instrument::GaugeU64(g)) = self.map.get(name) {
            g.record(value, attributes);
        } else {
            panic!("{} does not name a gauge", name);
        }
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr, $attrs:expr) => {
        $instr.add($name, $count, $attrs);
    };
}

#[macro_export]
macro_rules! gauge_setu {
    ($instr:expr, $name:expr, $value:expr, $attrs:expr) => {
        $instr.recordu($name, $value, $attrs);
    };
}
