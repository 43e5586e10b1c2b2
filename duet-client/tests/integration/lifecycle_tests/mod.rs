mod test_negotiation_stall;
mod test_remote_hangup;
mod test_skip_to_next;
