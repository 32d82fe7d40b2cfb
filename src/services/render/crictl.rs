//! `/etc/crictl.yaml`

use crate::config::paths;

pub fn render() -> String {
    let socket = paths::cri_socket_uri();
    format!(
        "# Managed by kubestrap\n\
         runtime-endpoint: {socket}\n\
         image-endpoint: {socket}\n\
         timeout: 10\n\
         debug: false\n"
    )
}
