use crate::model::GpsCoordinate;

/// Rounded `lat,lon` cell name.
pub fn grid_cell(coordinate: &GpsCoordinate, decimals: u8) -> String {
    let d = decimals as usize;
    // avoid "-0.00"
    let round = |v: f64| {
        let factor = 10f64.powi(decimals as i32);
        let r = (v * factor).round() / factor;
        if r == 0.0 {
            0.0
        } else {
            r
        }
    };
    format!(
        "{:.*},{:.*}",
        d,
        round(coordinate.latitude),
        d,
        round(coordinate.longitude)
    )
}

/// Greedy proximity zones over coordinates seen in order.
#[derive(Debug, Clone)]
pub struct ZoneIndex {
    radius_km: f64,
    seeds: Vec<GpsCoordinate>,
}

impl ZoneIndex {
    pub fn new(radius_km: f64) -> Self {
        Self {
            radius_km,
            seeds: Vec::new(),
        }
    }

    /// One-based zone number for `coordinate`. The first zone whose seed is
    /// within the radius wins; otherwise `coordinate` seeds a new zone.
    pub fn assign(&mut self, coordinate: GpsCoordinate) -> usize {
        if let Some(pos) = self
            .seeds
            .iter()
            .position(|seed| seed.distance_km(&coordinate) <= self.radius_km)
        {
            return pos + 1;
        }
        self.seeds.push(coordinate);
        self.seeds.len()
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

pub fn zone_name(zone: usize) -> String {
    format!("Zone-{:03}", zone)
}
