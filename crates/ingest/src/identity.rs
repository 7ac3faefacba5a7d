//! 대상 식별자 해석기
//!
//! 스캔된 호스트를 컨텍스트 내의 정규 자산과 인터페이스로 연결합니다.
//!
//! # 매칭 순서
//!
//! 1. 자산 이름 정확 일치 (대소문자 구분)
//! 2. 인터페이스 호스트명
//! 3. 인터페이스 FQDN
//! 4. 인터페이스 IP
//!
//! 첫 번째 일치가 이기며, 아무것도 없으면 가장 좋은 이름(호스트명/NetBIOS/FQDN, 없으면 IP)으로
//! 새 자산을 만듭니다. IP 이름으로 만들어진 자산은 더 좋은 이름이 나타나면 제자리에서 이름이 바뀝니다.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use stigpost_store::assets::InterfaceKey;
use stigpost_store::{Asset, InterfaceFields, Store, StoreError};
use tracing::{debug, info, warn};

/// 파서가 호스트 블록에서 수집한 식별 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub hostname: Option<String>,
    pub netbios: Option<String>,
    pub fqdn: Option<String>,
    pub ips: Vec<String>,
    pub mac: Option<String>,
}

impl HostIdentity {
    /// 주소를 추가합니다 (공백 제거, 중복 무시).
    pub fn add_ip(&mut self, ip: &str) {
        let ip = ip.trim();
        if !ip.is_empty() && !self.ips.iter().any(|i| i == ip) {
            self.ips.push(ip.to_owned());
        }
    }

    /// 이름 후보 (우선순위 순, 중복 제거)
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in [&self.hostname, &self.netbios, &self.fqdn]
            .into_iter()
            .flatten()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
        {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_owned());
            }
        }
        names
    }

    /// IP가 아닌 가장 좋은 이름
    pub fn best_name(&self) -> Option<String> {
        self.names().into_iter().find(|n| !is_ip(n))
    }

    /// 식별 정보가 전혀 없는지
    pub fn is_empty(&self) -> bool {
        self.names().is_empty() && self.ips.is_empty()
    }

    /// 진행률 표시용 이름
    pub fn display_name(&self) -> String {
        self.best_name()
            .or_else(|| self.ips.first().cloned())
            .unwrap_or_else(|| "unknown".to_owned())
    }
}

/// 해석 결과
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub asset: Asset,
    pub created: bool,
    /// 포트 증거를 붙일 기본 인터페이스
    pub primary_interface: Option<i64>,
}

/// 문자열이 IP 주소인지
pub fn is_ip(value: &str) -> bool {
    value.trim().parse::<IpAddr>().is_ok()
}

/// 식별자 해석기
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    /// 모든 호스트를 이 이름의 자산으로 강제합니다.
    target_name: Option<String>,
}

impl IdentityResolver {
    pub fn new(target_name: Option<String>) -> Self {
        Self {
            target_name: target_name
                .map(|n| n.trim().to_owned())
                .filter(|n| !n.is_empty()),
        }
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    /// 호스트를 자산으로 해석합니다 (없으면 생성). 같은 입력에 대해 멱등입니다.
    ///
    /// 이름도 주소도 없는 호스트는 `None`.
    pub fn resolve(
        &self,
        store: &Store,
        context_id: i64,
        identity: &HostIdentity,
    ) -> Result<Option<Resolved>, StoreError> {
        if identity.is_empty() && self.target_name.is_none() {
            return Ok(None);
        }

        let (asset_id, created) = match self.find(store, context_id, identity)? {
            Some(id) => (id, false),
            None => {
                let name = self.creation_name(identity);
                let id = store.insert_asset(context_id, &name)?;
                info!(context_id, asset = %name, "created asset");
                metrics::counter!(stigpost_core::metrics::INGEST_ASSETS_CREATED_TOTAL)
                    .increment(1);
                (id, true)
            }
        };

        if !created {
            self.maybe_rename(store, asset_id, identity)?;
        }
        let primary_interface = attach_interfaces(store, asset_id, identity)?;
        let asset = store.load_asset(asset_id)?;
        Ok(Some(Resolved {
            asset,
            created,
            primary_interface,
        }))
    }

    fn find(
        &self,
        store: &Store,
        context_id: i64,
        identity: &HostIdentity,
    ) -> Result<Option<i64>, StoreError> {
        if let Some(target) = &self.target_name {
            return store.find_asset_by_name(context_id, target);
        }

        let names = identity.names();

        // 1. 자산 이름 (IP로 이름 붙은 자산 포함)
        for candidate in names.iter().chain(identity.ips.iter()) {
            if let Some(id) = store.find_asset_by_name(context_id, candidate)? {
                debug!(candidate = %candidate, asset_id = id, "matched by asset name");
                return Ok(Some(id));
            }
        }
        // 2. 인터페이스 호스트명
        for candidate in [&identity.hostname, &identity.netbios].into_iter().flatten() {
            if let Some(id) =
                store.find_asset_by_interface(context_id, InterfaceKey::Hostname, candidate)?
            {
                debug!(candidate = %candidate, asset_id = id, "matched by interface hostname");
                return Ok(Some(id));
            }
        }
        // 3. FQDN
        if let Some(fqdn) = &identity.fqdn {
            if let Some(id) = store.find_asset_by_interface(context_id, InterfaceKey::Fqdn, fqdn)? {
                debug!(fqdn = %fqdn, asset_id = id, "matched by interface fqdn");
                return Ok(Some(id));
            }
        }
        // 4. IP
        for ip in &identity.ips {
            if let Some(id) = store.find_asset_by_interface(context_id, InterfaceKey::Ip, ip)? {
                debug!(ip = %ip, asset_id = id, "matched by interface ip");
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn creation_name(&self, identity: &HostIdentity) -> String {
        if let Some(target) = &self.target_name {
            return target.clone();
        }
        identity.display_name()
    }

    fn maybe_rename(
        &self,
        store: &Store,
        asset_id: i64,
        identity: &HostIdentity,
    ) -> Result<(), StoreError> {
        if self.target_name.is_some() {
            return Ok(());
        }
        let Some(better) = identity.best_name() else {
            return Ok(());
        };
        let asset = store.load_asset(asset_id)?;
        if !is_ip(&asset.name) || asset.name == better {
            return Ok(());
        }
        if store.rename_asset(asset_id, &better)? {
            info!(asset_id, from = %asset.name, to = %better, "renamed asset");
        } else {
            warn!(asset_id, from = %asset.name, to = %better, "rename skipped, name already taken");
        }
        Ok(())
    }
}

/// 관찰된 주소마다 인터페이스를 찾거나 만들고, 빈 필드를 채웁니다.
///
/// 기본 인터페이스 id(첫 번째 주소의 인터페이스)를 반환합니다.
fn attach_interfaces(
    store: &Store,
    asset_id: i64,
    identity: &HostIdentity,
) -> Result<Option<i64>, StoreError> {
    let asset = store.load_asset(asset_id)?;
    let mut primary = None;

    let base = InterfaceFields {
        name: None,
        ipv4: None,
        ipv6: None,
        hostname: identity.hostname.clone().or_else(|| identity.netbios.clone()),
        fqdn: identity.fqdn.clone(),
        mac: identity.mac.clone(),
    };

    if identity.ips.is_empty() {
        if base.is_empty() {
            return Ok(asset.interfaces.first().map(|i| i.id));
        }
        let id = match asset.interfaces.first() {
            Some(existing) => {
                store.fill_interface(existing.id, &base)?;
                existing.id
            }
            None => store.insert_interface(asset_id, &base)?,
        };
        return Ok(Some(id));
    }

    for ip in &identity.ips {
        let mut fields = base.clone();
        match ip.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => fields.ipv6 = Some(ip.clone()),
            _ => fields.ipv4 = Some(ip.clone()),
        }

        let id = if let Some(existing) = asset.interface_by_ip(ip) {
            store.fill_interface(existing.id, &fields)?;
            existing.id
        } else if let Some(bare) = asset
            .interfaces
            .iter()
            .find(|i| i.ipv4.is_none() && i.ipv6.is_none())
        {
            // 이름만으로 만들어졌던 인터페이스에 주소를 채움
            store.fill_interface(bare.id, &fields)?;
            bare.id
        } else {
            store.insert_interface(asset_id, &fields)?
        };
        primary.get_or_insert(id);
    }
    Ok(primary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip_only(ip: &str) -> HostIdentity {
        let mut id = HostIdentity::default();
        id.add_ip(ip);
        id
    }

    fn named(name: &str, ip: &str) -> HostIdentity {
        let mut id = ip_only(ip);
        id.hostname = Some(name.to_owned());
        id
    }

    #[test]
    fn ip_first_then_hostname_is_one_asset_renamed() {
        let store = Store::open_in_memory().unwrap();
        let resolver = IdentityResolver::default();

        let first = resolver
            .resolve(&store, 1, &ip_only("10.0.0.5"))
            .unwrap()
            .unwrap();
        assert!(first.created);
        assert_eq!(first.asset.name, "10.0.0.5");

        let second = resolver
            .resolve(&store, 1, &named("WEB01", "10.0.0.5"))
            .unwrap()
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.asset.id, first.asset.id);
        assert_eq!(second.asset.name, "WEB01");
        assert_eq!(second.asset.interfaces.len(), 1);
        let iface = &second.asset.interfaces[0];
        assert_eq!(iface.ipv4.as_deref(), Some("10.0.0.5"));
        assert_eq!(iface.hostname.as_deref(), Some("WEB01"));
        assert_eq!(store.count_assets(1).unwrap(), 1);
    }

    #[test]
    fn resolution_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let resolver = IdentityResolver::default();
        let host = named("db01", "10.0.0.9");
        let a = resolver.resolve(&store, 1, &host).unwrap().unwrap();
        let b = resolver.resolve(&store, 1, &host).unwrap().unwrap();
        assert_eq!(a.asset, b.asset);
        assert_eq!(a.primary_interface, b.primary_interface);
        assert_eq!(store.count_assets(1).unwrap(), 1);
    }

    #[test]
    fn exact_name_beats_interface_match() {
        let store = Store::open_in_memory().unwrap();
        let resolver = IdentityResolver::default();
        let web = resolver
            .resolve(&store, 1, &named("web01", "10.0.0.5"))
            .unwrap()
            .unwrap();
        let db = resolver
            .resolve(&store, 1, &named("db01", "10.0.0.6"))
            .unwrap()
            .unwrap();

        // db01이라는 이름과 web01의 IP가 함께 보고되면 이름이 이김
        let hit = resolver
            .resolve(&store, 1, &named("db01", "10.0.0.5"))
            .unwrap()
            .unwrap();
        assert_eq!(hit.asset.id, db.asset.id);
        assert_ne!(hit.asset.id, web.asset.id);
    }

    #[test]
    fn fqdn_match_and_ipv6_separation() {
        let store = Store::open_in_memory().unwrap();
        let resolver = IdentityResolver::default();
        let mut first = ip_only("fe80::1");
        first.fqdn = Some("app.example.mil".to_owned());
        let a = resolver.resolve(&store, 1, &first).unwrap().unwrap();
        assert_eq!(a.asset.name, "app.example.mil");
        assert_eq!(a.asset.interfaces[0].ipv6.as_deref(), Some("fe80::1"));
        assert_eq!(a.asset.interfaces[0].ipv4, None);

        let mut second = ip_only("10.1.1.1");
        second.fqdn = Some("APP.example.mil".to_owned());
        let b = resolver.resolve(&store, 1, &second).unwrap().unwrap();
        assert_eq!(a.asset.id, b.asset.id);
        assert_eq!(b.asset.interfaces.len(), 2);
    }

    #[test]
    fn target_name_override_forces_single_asset() {
        let store = Store::open_in_memory().unwrap();
        let resolver = IdentityResolver::new(Some("  SITE-WS01 ".to_owned()));
        let a = resolver
            .resolve(&store, 1, &named("whatever", "10.0.0.1"))
            .unwrap()
            .unwrap();
        let b = resolver
            .resolve(&store, 1, &HostIdentity::default())
            .unwrap()
            .unwrap();
        assert_eq!(a.asset.name, "SITE-WS01");
        assert_eq!(a.asset.id, b.asset.id);
    }

    #[test]
    fn empty_identity_is_skipped() {
        let store = Store::open_in_memory().unwrap();
        let resolver = IdentityResolver::default();
        assert!(
            resolver
                .resolve(&store, 1, &HostIdentity::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn name_only_host_gets_address_later() {
        let store = Store::open_in_memory().unwrap();
        let resolver = IdentityResolver::default();
        let mut first = HostIdentity::default();
        first.netbios = Some("WS01".to_owned());
        let a = resolver.resolve(&store, 1, &first).unwrap().unwrap();
        assert_eq!(a.asset.interfaces.len(), 1);

        let b = resolver
            .resolve(&store, 1, &named("WS01", "10.0.0.7"))
            .unwrap()
            .unwrap();
        assert_eq!(b.asset.interfaces.len(), 1);
        assert_eq!(b.asset.interfaces[0].ipv4.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn names_are_deduplicated_in_priority_order() {
        let id = HostIdentity {
            hostname: Some("web01".to_owned()),
            netbios: Some("web01".to_owned()),
            fqdn: Some("web01.example.mil".to_owned()),
            ips: vec![],
            mac: None,
        };
        assert_eq!(id.names(), vec!["web01", "web01.example.mil"]);
        assert_eq!(id.best_name().as_deref(), Some("web01"));
    }
}
