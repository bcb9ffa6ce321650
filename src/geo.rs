use crate::constants::EARTH_RADIUS_KM;

fn to_radians(value: f64) -> f64 {
    value * std::f64::consts::PI / 180.0
}

/// Great-circle distance between two coordinates, in kilometres.
pub fn distance_km(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let lat_a_rad = to_radians(lat_a);
    let lat_b_rad = to_radians(lat_b);
    let d_lat = lat_b_rad - lat_a_rad;
    let d_lon = to_radians(lon_b - lon_a);
    let sin_lat = (d_lat / 2.0).sin();
    let sin_lon = (d_lon / 2.0).sin();
    let a = sin_lat * sin_lat + lat_a_rad.cos() * lat_b_rad.cos() * sin_lon * sin_lon;
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

/// Latitude offset (degrees) that lands `km` due north of the equator line.
/// Used to place fixtures at exact distances.
#[cfg(test)]
pub fn degrees_for_km(km: f64) -> f64 {
    km / EARTH_RADIUS_KM * 180.0 / std::f64::consts::PI
}
