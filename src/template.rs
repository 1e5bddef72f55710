pub const ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";

/// Traffic-shaping parameters embedded in every client config. The values
/// are part of the wire contract with deployed nodes and their decoder.
#[derive(Debug, Clone)]
pub struct ObfuscationParams {
    pub jc: u32,
    pub jmin: u32,
    pub jmax: u32,
    pub s1: u32,
    pub s2: u32,
    pub h1: u32,
    pub h2: u32,
    pub h3: u32,
    pub h4: u32,
}

impl Default for ObfuscationParams {
    fn default() -> Self {
        Self {
            jc: 2,
            jmin: 10,
            jmax: 50,
            s1: 91,
            s2: 149,
            h1: 96800746,
            h2: 55774911,
            h3: 440992545,
            h4: 1000889014,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
    pub dns: String,
    pub private_key: String,
    pub obfuscation: ObfuscationParams,
    pub server_public_key: String,
    pub preshared_key: String,
    pub allowed_ips: String,
    pub endpoint: String,
    pub keepalive: u16,
}

impl ClientConfig {
    /// Field order and line syntax are frozen: the rendered text is the
    /// payload that gets compressed and encoded, so any drift changes the
    /// final URI.
    pub fn render(&self) -> String {
        format!(
            "[Interface]
Address = {address}
DNS = {dns}
PrivateKey = {private_key}
Jc = {jc}
Jmin = {jmin}
Jmax = {jmax}
S1 = {s1}
S2 = {s2}
H1 = {h1}
H2 = {h2}
H3 = {h3}
H4 = {h4}
[Peer]
PublicKey = {public_key}
PresharedKey = {preshared_key}
AllowedIPs = {allowed_ips}
Endpoint = {endpoint}
PersistentKeepalive = {keepalive}
",
            address = self.address,
            dns = self.dns,
            private_key = self.private_key,
            jc = self.obfuscation.jc,
            jmin = self.obfuscation.jmin,
            jmax = self.obfuscation.jmax,
            s1 = self.obfuscation.s1,
            s2 = self.obfuscation.s2,
            h1 = self.obfuscation.h1,
            h2 = self.obfuscation.h2,
            h3 = self.obfuscation.h3,
            h4 = self.obfuscation.h4,
            public_key = self.server_public_key,
            preshared_key = self.preshared_key,
            allowed_ips = self.allowed_ips,
            endpoint = self.endpoint,
            keepalive = self.keepalive,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_the_frozen_layout() {
        let config = ClientConfig {
            address: "10.8.1.7/32".to_owned(),
            dns: "1.1.1.1, 1.0.0.1".to_owned(),
            private_key: "CLIENT_PRIV".to_owned(),
            obfuscation: ObfuscationParams::default(),
            server_public_key: "SERVER_PUB".to_owned(),
            preshared_key: "PSK".to_owned(),
            allowed_ips: ALLOWED_IPS.to_owned(),
            endpoint: "203.0.113.5:51820".to_owned(),
            keepalive: 25,
        };

        let expected = "[Interface]\n\
            Address = 10.8.1.7/32\n\
            DNS = 1.1.1.1, 1.0.0.1\n\
            PrivateKey = CLIENT_PRIV\n\
            Jc = 2\n\
            Jmin = 10\n\
            Jmax = 50\n\
            S1 = 91\n\
            S2 = 149\n\
            H1 = 96800746\n\
            H2 = 55774911\n\
            H3 = 440992545\n\
            H4 = 1000889014\n\
            [Peer]\n\
            PublicKey = SERVER_PUB\n\
            PresharedKey = PSK\n\
            AllowedIPs = 0.0.0.0/0, ::/0\n\
            Endpoint = 203.0.113.5:51820\n\
            PersistentKeepalive = 25\n";

        assert_eq!(config.render(), expected);
    }

    #[test]
    fn rendering_is_deterministic() {
        let config = ClientConfig {
            address: "10.8.1.44/32".to_owned(),
            dns: "9.9.9.9".to_owned(),
            private_key: "k".to_owned(),
            obfuscation: ObfuscationParams::default(),
            server_public_key: "p".to_owned(),
            preshared_key: "s".to_owned(),
            allowed_ips: ALLOWED_IPS.to_owned(),
            endpoint: "node:1".to_owned(),
            keepalive: 25,
        };

        assert_eq!(config.render(), config.render());
    }
}
