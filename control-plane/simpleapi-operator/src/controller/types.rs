use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteKind {
    HttpRoute,
    Ingress,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown route kind '{0}', expected 'httproute' or 'ingress'")]
pub struct UnknownRouteKind(pub String);

impl FromStr for RouteKind {
    type Err = UnknownRouteKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "httproute" => Ok(RouteKind::HttpRoute),
            "ingress" => Ok(RouteKind::Ingress),
            _ => Err(UnknownRouteKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for RouteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteKind::HttpRoute => write!(f, "HTTPRoute"),
            RouteKind::Ingress => write!(f, "Ingress"),
        }
    }
}

/// Where a reconcile pass currently is; carried by errors for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Applying,
    RoutingSync,
    Status,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Fetching => write!(f, "fetching"),
            Stage::Applying => write!(f, "applying"),
            Stage::RoutingSync => write!(f, "routing-sync"),
            Stage::Status => write!(f, "status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_kind_parses_case_insensitively() {
        assert_eq!("httproute".parse(), Ok(RouteKind::HttpRoute));
        assert_eq!("HTTPRoute".parse(), Ok(RouteKind::HttpRoute));
        assert_eq!(" Ingress ".parse(), Ok(RouteKind::Ingress));
    }

    #[test]
    fn unknown_route_kind_is_rejected() {
        let err = "ingres".parse::<RouteKind>().unwrap_err();
        assert_eq!(err, UnknownRouteKind("ingres".into()));
        assert!(err.to_string().contains("'ingres'"));
    }
}
