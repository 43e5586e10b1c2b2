mod test_both_peers_connect;
mod test_late_responder;
