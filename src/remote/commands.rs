/// Builds the literal shell commands issued to a node. Every command runs
/// inside the node's VPN service container, whose name is configuration.
#[derive(Debug, Clone)]
pub struct RemoteCommands {
    container: String,
}

impl RemoteCommands {
    pub fn new(container: String) -> Self {
        Self { container }
    }

    pub fn read_config(&self, path: &str) -> String {
        format!("docker exec -i {} cat {}", self.container, path)
    }

    pub fn generate_private_key(&self) -> String {
        format!("docker exec -i {} wg genkey", self.container)
    }

    pub fn derive_public_key(&self, private_key: &str) -> String {
        format!(
            "echo '{}' | docker exec -i {} wg pubkey",
            private_key, self.container
        )
    }

    pub fn generate_preshared_key(&self) -> String {
        format!("docker exec -i {} wg genpsk", self.container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_wrap_container_exec() {
        let cmds = RemoteCommands::new("amnezia-awg".to_owned());
        assert_eq!(
            cmds.read_config("/opt/amnezia/awg/wg0.conf"),
            "docker exec -i amnezia-awg cat /opt/amnezia/awg/wg0.conf"
        );
        assert_eq!(
            cmds.generate_private_key(),
            "docker exec -i amnezia-awg wg genkey"
        );
        assert_eq!(
            cmds.derive_public_key("PRIV"),
            "echo 'PRIV' | docker exec -i amnezia-awg wg pubkey"
        );
        assert_eq!(
            cmds.generate_preshared_key(),
            "docker exec -i amnezia-awg wg genpsk"
        );
    }
}
