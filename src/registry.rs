//! Per-vessel state registry
//!
//! Owned by the coordinator task; every merge runs on that single task, so
//! the map needs no locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{Mmsi, RawAisMessage, VesselIdentity, VesselPosition, VesselState};

#[derive(Debug, Default)]
pub struct VesselRegistry {
    vessels: HashMap<Mmsi, VesselState>,
}

impl VesselRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `message` into the state of its vessel and return the result.
    ///
    /// Fields absent from the message keep their previous values. A
    /// position or identity block is left alone if the message is older
    /// than that block's last update.
    pub fn merge(&mut self, message: &RawAisMessage) -> VesselState {
        let state = self
            .vessels
            .entry(message.source_id)
            .or_insert_with(|| VesselState::new(message.source_id, message.received_at));

        if message.received_at > state.last_seen_at {
            state.last_seen_at = message.received_at;
        }
        if message.received_at < state.first_seen_at {
            state.first_seen_at = message.received_at;
        }

        merge_position(state, message);
        merge_identity(state, message);

        state.clone()
    }

    /// Seed identity from a previous run. Never overrides live data.
    pub fn seed_identity(&mut self, identifier: Mmsi, identity: VesselIdentity) {
        let state = self
            .vessels
            .entry(identifier)
            .or_insert_with(|| VesselState::new(identifier, identity.updated_at));
        if state.identity.is_none() {
            state.identity = Some(identity);
        }
    }

    pub fn get(&self, identifier: &Mmsi) -> Option<&VesselState> {
        self.vessels.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.vessels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vessels.is_empty()
    }

    /// Identities worth persisting, keyed by identifier
    pub fn identities(&self) -> impl Iterator<Item = (Mmsi, &VesselIdentity)> {
        self.vessels
            .iter()
            .filter_map(|(mmsi, state)| state.identity.as_ref().map(|identity| (*mmsi, identity)))
    }
}

fn is_stale(received_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> bool {
    received_at < updated_at
}

fn merge_position(state: &mut VesselState, message: &RawAisMessage) {
    let (Some(latitude), Some(longitude)) = (message.latitude, message.longitude) else {
        return;
    };
    if let Some(previous) = &state.position {
        if is_stale(message.received_at, previous.updated_at) {
            return;
        }
    }

    state.position = Some(VesselPosition {
        latitude,
        longitude,
        speed_over_ground: message.speed_over_ground,
        course_over_ground: message.course_over_ground,
        true_heading: message.true_heading,
        nav_status: message.nav_status,
        updated_at: message.received_at,
    });
}

fn merge_identity(state: &mut VesselState, message: &RawAisMessage) {
    if !message.has_identity() {
        return;
    }

    match &mut state.identity {
        Some(identity) => {
            if is_stale(message.received_at, identity.updated_at) {
                return;
            }
            if let Some(name) = &message.vessel_name {
                identity.name = Some(name.clone());
            }
            if let Some(callsign) = &message.callsign {
                identity.callsign = Some(callsign.clone());
            }
            if let Some(code) = message.ship_type_code {
                identity.ship_type_code = Some(code);
            }
            if let Some(destination) = &message.destination {
                identity.destination = Some(destination.clone());
            }
            identity.updated_at = message.received_at;
        }
        None => {
            state.identity = Some(VesselIdentity {
                name: message.vessel_name.clone(),
                callsign: message.callsign.clone(),
                ship_type_code: message.ship_type_code,
                destination: message.destination.clone(),
                updated_at: message.received_at,
            });
        }
    }
}
