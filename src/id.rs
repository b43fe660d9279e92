use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of an auto-generated route id, per the configuration document's `id` field default.
const GENERATED_ID_LEN: usize = 10;

/// Generates a 10-character alphanumeric id for a route that omitted `id` in its configuration.
pub fn generate_route_id() -> String {
	rand::rng()
		.sample_iter(&Alphanumeric)
		.take(GENERATED_ID_LEN)
		.map(char::from)
		.collect()
}
