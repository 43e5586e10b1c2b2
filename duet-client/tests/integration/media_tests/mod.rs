mod test_permission_denied;
mod test_toggle_media;
