//! Dependency tickets and the prerequisite graph between them.
//!
//! A ticket names one value source or derived quantity of a system. Edges
//! point from a ticket to its prerequisites; invalidation walks them in the
//! opposite direction.

use core::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyTicket(u32);

const WELL_KNOWN: [&str; 19] = [
    "nothing",
    "time",
    "accuracy",
    "xc",
    "xd",
    "xa",
    "x",
    "pn",
    "pa",
    "all_parameters",
    "u",
    "all_sources_except_input_ports",
    "all_sources",
    "xcdot",
    "potential_energy",
    "kinetic_energy",
    "conservative_power",
    "nonconservative_power",
    "unique_periodic_discrete_update",
];

impl DependencyTicket {
    pub const NOTHING: Self = Self(0);
    pub const TIME: Self = Self(1);
    pub const ACCURACY: Self = Self(2);
    pub const XC: Self = Self(3);
    pub const XD: Self = Self(4);
    pub const XA: Self = Self(5);
    pub const ALL_STATE: Self = Self(6);
    pub const PN: Self = Self(7);
    pub const PA: Self = Self(8);
    pub const ALL_PARAMETERS: Self = Self(9);
    pub const ALL_INPUT_PORTS: Self = Self(10);
    pub const ALL_SOURCES_EXCEPT_INPUT_PORTS: Self = Self(11);
    pub const ALL_SOURCES: Self = Self(12);
    pub const XCDOT: Self = Self(13);
    pub const POTENTIAL_ENERGY: Self = Self(14);
    pub const KINETIC_ENERGY: Self = Self(15);
    pub const CONSERVATIVE_POWER: Self = Self(16);
    pub const NONCONSERVATIVE_POWER: Self = Self(17);
    pub const UNIQUE_PERIODIC_DISCRETE_UPDATE: Self = Self(18);
    /// First ticket available for per-system minting.
    pub const FIRST_FREE: Self = Self(19);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("ticket count fits in u32"))
    }

    pub fn is_well_known(self) -> bool {
        self < Self::FIRST_FREE
    }
}

impl fmt::Debug for DependencyTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match WELL_KNOWN.get(self.index()) {
            Some(name) => write!(f, "Ticket({name})"),
            None => write!(f, "Ticket({})", self.0),
        }
    }
}

impl fmt::Display for DependencyTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match WELL_KNOWN.get(self.index()) {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Prerequisite edges for every ticket of one system.
#[derive(Clone, Debug)]
pub struct TicketGraph {
    prerequisites: Vec<Vec<DependencyTicket>>,
}

impl Default for TicketGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketGraph {
    /// Graph holding only the well-known tickets and their built-in edges.
    pub fn new() -> Self {
        use DependencyTicket as D;
        let mut graph = Self {
            prerequisites: vec![Vec::new(); D::FIRST_FREE.index()],
        };
        graph.set_prerequisites(D::ALL_STATE, [D::XC, D::XD, D::XA]);
        graph.set_prerequisites(D::ALL_PARAMETERS, [D::PN, D::PA]);
        graph.set_prerequisites(
            D::ALL_SOURCES_EXCEPT_INPUT_PORTS,
            [D::TIME, D::ACCURACY, D::ALL_STATE, D::ALL_PARAMETERS],
        );
        graph.set_prerequisites(
            D::ALL_SOURCES,
            [D::ALL_SOURCES_EXCEPT_INPUT_PORTS, D::ALL_INPUT_PORTS],
        );
        graph
    }

    pub fn num_tickets(&self) -> usize {
        self.prerequisites.len()
    }

    pub fn contains(&self, ticket: DependencyTicket) -> bool {
        ticket.index() < self.prerequisites.len()
    }

    pub fn prerequisites(&self, ticket: DependencyTicket) -> &[DependencyTicket] {
        self.prerequisites
            .get(ticket.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Allocate a new ticket depending on `prerequisites`.
    pub fn mint(&mut self, prerequisites: impl IntoIterator<Item = DependencyTicket>) -> DependencyTicket {
        let ticket = DependencyTicket::from_index(self.prerequisites.len());
        self.prerequisites.push(prerequisites.into_iter().collect());
        ticket
    }

    /// Replace the prerequisites of an existing ticket.
    pub fn set_prerequisites(
        &mut self,
        ticket: DependencyTicket,
        prerequisites: impl IntoIterator<Item = DependencyTicket>,
    ) {
        if let Some(slot) = self.prerequisites.get_mut(ticket.index()) {
            *slot = prerequisites.into_iter().collect();
        }
    }

    pub fn add_prerequisite(&mut self, ticket: DependencyTicket, prerequisite: DependencyTicket) {
        if let Some(slot) = self.prerequisites.get_mut(ticket.index()) {
            if !slot.contains(&prerequisite) {
                slot.push(prerequisite);
            }
        }
    }

    /// For every ticket, itself plus every ticket that transitively depends
    /// on it. `nothing` has no dependents.
    pub fn downstream_closure(&self) -> Vec<Vec<DependencyTicket>> {
        let n = self.prerequisites.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (ticket, prereqs) in self.prerequisites.iter().enumerate() {
            for p in prereqs {
                if p.index() < n && *p != DependencyTicket::NOTHING {
                    dependents[p.index()].push(ticket);
                }
            }
        }

        (0..n)
            .map(|start| {
                let mut seen = vec![false; n];
                let mut stack = vec![start];
                let mut out = Vec::new();
                while let Some(t) = stack.pop() {
                    if seen[t] {
                        continue;
                    }
                    seen[t] = true;
                    out.push(DependencyTicket::from_index(t));
                    stack.extend(dependents[t].iter().copied().filter(|d| !seen[*d]));
                }
                out.sort();
                out
            })
            .collect()
    }

    /// True when a change to `upstream` can reach `downstream`.
    pub fn depends_on(&self, downstream: DependencyTicket, upstream: DependencyTicket) -> bool {
        let mut seen = vec![false; self.prerequisites.len()];
        let mut stack = vec![downstream];
        while let Some(t) = stack.pop() {
            if t == upstream {
                return true;
            }
            match seen.get_mut(t.index()) {
                Some(s) if !*s => *s = true,
                _ => continue,
            }
            stack.extend(self.prerequisites(t).iter().copied());
        }
        false
    }
}
