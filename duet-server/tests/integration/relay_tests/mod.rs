mod test_broadcast_to_topic;
mod test_health_and_stats;
mod test_signaling_over_relay;
