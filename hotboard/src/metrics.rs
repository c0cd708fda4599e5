// Copyright (C) 2026 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of hotboard.
//
// hotboard is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// hotboard is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with hotboard.  If not,
// see <http://www.gnu.org/licenses/>.

//! # hotboard metrics
//!
//! hotboard reports counters & gauges through [OpenTelemetry]; they're scraped off the private
//! listener at `/metrics` in Prometheus text format.
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! OTel "instruments" are meant to be built once & re-used. Rather than give the application state
//! one field per instrument, each module declares the metrics it reports next to the code that
//! reports them:
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("votes.cast", Sort::IntegralCounter) }
//! // ...
//! counter_add!(self.instruments, "votes.cast", 1, &[]);
//! ```
//!
//! [inventory] gathers the registrations at link time & [Instruments::new] builds every registered
//! instrument up-front, so recording only needs `&self` & an [Instruments] can live in an `Arc`.
//!
//! Naming a metric that was never registered, or recording against the wrong sort of instrument,
//! is a programming error & panics. [check_metric_registrations] is run at startup so duplicate
//! names are caught before the first request.

use std::collections::{HashMap, HashSet, hash_map::Entry};

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Gauge},
};

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// `Counter<u64>`
    IntegralCounter,
    /// `Gauge<f64>`
    FloatGauge,
    /// `Gauge<u64>`
    IntegralGauge,
}

/// A metric name & the sort of instrument behind it
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

/// Return the first metric name registered more than once, if any
pub fn check_metric_registrations() -> Option<&'static str> {
    let mut names: HashSet<&'static str> = HashSet::new();
    inventory::iter::<Registration>
        .into_iter()
        .find(|reg| !names.insert(reg.name()))
        .map(|reg| reg.name())
}

enum Instrument {
    CounterU64(Counter<u64>),
    GaugeF64(Gauge<f64>),
    GaugeU64(Gauge<u64>),
}

/// Container for OTel instruments
pub struct Instruments {
    map: HashMap<&'static str, Instrument>,
}

impl Instruments {
    pub fn new(scope: &'static str) -> Instruments {
        let meter = global::meter(scope);
        let mut map: HashMap<&'static str, Instrument> = HashMap::new();
        inventory::iter::<Registration>
            .into_iter()
            .for_each(|reg| match map.entry(reg.name()) {
                Entry::Occupied(_) => panic!("The metric name {} was used twice", reg.name()),
                Entry::Vacant(vacant) => {
                    vacant.insert(match reg.sort() {
                        Sort::IntegralCounter => {
                            Instrument::CounterU64(meter.u64_counter(reg.name()).build())
                        }
                        Sort::FloatGauge => Instrument::GaugeF64(meter.f64_gauge(reg.name()).build()),
                        Sort::IntegralGauge => {
                            Instrument::GaugeU64(meter.u64_gauge(reg.name()).build())
                        }
                    });
                }
            });
        Instruments { map }
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        match self.map.get(name) {
            Some(Instrument::CounterU64(c)) => c.add(count, attributes),
            _ => panic!("{} does not name a counter", name),
        }
    }
    pub fn recordf(&self, name: &str, value: f64, attributes: &[KeyValue]) {
        match self.map.get(name) {
            Some(Instrument::GaugeF64(g)) => g.record(value, attributes),
            _ => panic!("{} does not name a float gauge", name),
        }
    }
    pub fn recordu(&self, name: &str, value: u64, attributes: &[KeyValue]) {
        match self.map.get(name) {
            Some(Instrument::GaugeU64(g)) => g.record(value, attributes),
            _ => panic!("{} does not name an integral gauge", name),
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

#[macro_export]
macro_rules! gauge_setf {
    ($instr:expr, $name:expr, $value:expr, $attrs:expr) => {
        $instr.recordf($name, $value, $attrs);
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registrations_are_unique() {
        assert_eq!(check_metric_registrations(), None);
        // Every registered name resolves to an instrument of the registered sort:
        let instruments = Instruments::new("hotboard-test");
        inventory::iter::<Registration>
            .into_iter()
            .for_each(|reg| match reg.sort() {
                Sort::IntegralCounter => instruments.add(reg.name(), 0, &[]),
                Sort::FloatGauge => instruments.recordf(reg.name(), 0.0, &[]),
                Sort::IntegralGauge => instruments.recordu(reg.name(), 0, &[]),
            });
    }
}
