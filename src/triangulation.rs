//! Constrained Delaunay triangulation of a polygon with holes, refined
//! against a size field.
//!
//! The initial triangulation comes from ear clipping. Ear clipping drops
//! boundary nodes that are collinear with their neighbours and, on dense
//! straight edges, may emit zero-area ears. Those ears are discarded and the
//! missing nodes are split back into the boundary edges they lie on before
//! Lawson flips make the triangulation Delaunay away from the rings. Refinement inserts
//! circumcentres with a Bowyer-Watson cavity that never crosses a ring edge.
//!
//! Point indices `0..boundary_len()` are the ring nodes in input order.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;
use nalgebra::Point2;

use crate::{
    error::{PlatemeshError, Result},
    polygon,
};

/// Largest accepted circumradius to shortest edge ratio
const MAX_RADIUS_EDGE_RATIO: f64 = 2.0;

/// Largest accepted circumradius relative to the local size.
/// An equilateral triangle of edge `h` has circumradius `0.577 h`.
const SIZE_FACTOR: f64 = 0.75;

const AREA_TOLERANCE: f64 = 1e-9;

#[inline]
fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn sorted(mut tri: [usize; 3]) -> [usize; 3] {
    tri.sort_unstable();
    tri
}

/// Circumcentre and circumradius of a triangle
fn circumcircle(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> (Point2<f64>, f64) {
    let ab = b - a;
    let ac = c - a;
    let d = 2.0 * (ab.x * ac.y - ab.y * ac.x);
    let ab2 = ab.norm_squared();
    let ac2 = ac.norm_squared();
    let offset = nalgebra::Vector2::new(
        (ac.y * ab2 - ab.y * ac2) / d,
        (ab.x * ac2 - ac.x * ab2) / d,
    );
    (a + offset, offset.norm())
}

/// Orders the nodes of a zero-area triangle as `(end, middle, end)`.
/// Coincident nodes have no middle.
fn straighten(
    points: &[Point2<f64>],
    a: usize,
    b: usize,
    c: usize,
) -> Option<(usize, usize, usize)> {
    let span = |u: usize, v: usize| (points[u] - points[v]).norm();
    let (ab, bc, ca) = (span(a, b), span(b, c), span(c, a));
    if ab == 0.0 || bc == 0.0 || ca == 0.0 {
        return None;
    }
    if ca >= ab && ca >= bc {
        Some((c, b, a))
    } else if ab >= bc {
        Some((a, c, b))
    } else {
        Some((b, a, c))
    }
}

/// Target element size: boundary spacing grown linearly with distance
#[derive(Debug, Clone)]
pub struct SizeField {
    nodes: Vec<(Point2<f64>, f64)>,
    grading: f64,
    cap: f64,
}

impl SizeField {
    /// Uses the mean length of the two segments meeting at each ring node
    pub fn from_rings(rings: &[Vec<Point2<f64>>], grading: f64) -> SizeField {
        let mut nodes = Vec::new();
        for ring in rings {
            let n = ring.len();
            for i in 0..n {
                let prev = ring[(i + n - 1) % n];
                let next = ring[(i + 1) % n];
                let h = 0.5 * ((ring[i] - prev).norm() + (next - ring[i]).norm());
                nodes.push((ring[i], h));
            }
        }
        let cap = nodes.iter().map(|(_, h)| *h).fold(0.0, f64::max);

        SizeField {
            nodes,
            grading,
            cap,
        }
    }

    pub fn at(&self, p: &Point2<f64>) -> f64 {
        self.nodes
            .iter()
            .map(|(q, h)| h + self.grading * (p - q).norm())
            .fold(self.cap, f64::min)
    }
}

#[derive(Debug, Clone)]
pub struct Triangulation {
    points: Vec<Point2<f64>>,
    /// Counter-clockwise vertex triples
    triangles: Vec<[usize; 3]>,
    /// `neighbors[t][i]` shares the edge opposite vertex `i` of triangle `t`
    neighbors: Vec<[Option<usize>; 3]>,
    constrained: HashSet<(usize, usize)>,
    boundary_len: usize,
    domain_area: f64,
}

impl Triangulation {
    /// Triangulates the region inside `rings[0]` and outside every other ring
    ///
    /// # Arguments
    /// * `rings` - Closed contours without a repeated end point, outer first
    ///
    /// # Returns
    /// A constrained Delaunay triangulation whose edges include every ring edge
    pub fn from_rings(rings: &[Vec<Point2<f64>>]) -> Result<Triangulation> {
        if rings.is_empty() {
            return Err(PlatemeshError::MeshNonConvergence(
                "no boundary to triangulate".to_owned(),
            ));
        }

        let mut points: Vec<Point2<f64>> = Vec::new();
        let mut spans: Vec<(usize, usize)> = Vec::with_capacity(rings.len());
        let mut domain_area = 0.0;

        for (k, ring) in rings.iter().enumerate() {
            if ring.len() < 3 {
                return Err(PlatemeshError::MeshNonConvergence(format!(
                    "boundary ring {k} has only {} nodes",
                    ring.len()
                )));
            }
            spans.push((points.len(), ring.len()));
            let area = polygon::signed_area(ring).abs();
            domain_area += if k == 0 { area } else { -area };
            points.extend_from_slice(ring);
        }

        let coords: Vec<f64> = points.iter().flat_map(|p| [p.x, p.y]).collect();
        let hole_starts: Vec<usize> = spans[1..].iter().map(|&(start, _)| start).collect();
        let indices = earcutr::earcut(&coords, &hole_starts, 2).map_err(|e| {
            PlatemeshError::MeshNonConvergence(format!("ear clipping failed: {e:?}"))
        })?;

        Triangulation::from_ears(points, &spans, domain_area, &indices)
    }

    /// Builds the constrained Delaunay triangulation from ear clipping output
    ///
    /// Zero-area ears are dropped and their middle node is split back into
    /// the hull edge the dropped ear leaves behind. Nodes the ear clipping
    /// skipped are split into the hull edge joining their nearest used
    /// neighbours along the ring.
    ///
    /// # Arguments
    /// * `points` - Ring nodes, ring after ring
    /// * `spans` - Start and length of every ring in `points`
    /// * `domain_area` - Area enclosed by the rings
    /// * `indices` - Vertex triples of the ear clipping
    fn from_ears(
        points: Vec<Point2<f64>>,
        spans: &[(usize, usize)],
        domain_area: f64,
        indices: &[usize],
    ) -> Result<Triangulation> {
        let mut constrained = HashSet::new();
        for &(start, len) in spans {
            for i in 0..len {
                constrained.insert(edge_key(start + i, start + (i + 1) % len));
            }
        }

        let mut triangles = Vec::with_capacity(indices.len() / 3);
        let mut flat: Vec<(usize, usize, usize)> = Vec::new();
        for tri in indices.chunks_exact(3) {
            let (a, b, c) = (tri[0], tri[1], tri[2]);
            let o = polygon::orient(&points[a], &points[b], &points[c]);
            if o > 0.0 {
                triangles.push([a, b, c]);
            } else if o < 0.0 {
                triangles.push([a, c, b]);
            } else if let Some(ear) = straighten(&points, a, b, c) {
                flat.push(ear);
            }
        }
        if !flat.is_empty() {
            debug!("dropped {} zero-area ears", flat.len());
        }

        let boundary_len = points.len();
        let mut triangulation = Triangulation {
            points,
            triangles,
            neighbors: Vec::new(),
            constrained,
            boundary_len,
            domain_area,
        };
        triangulation.link_all()?;
        triangulation.restore_ring_nodes(spans, &flat)?;

        let present: HashSet<(usize, usize)> = (0..triangulation.triangles.len())
            .flat_map(|t| (0..3).map(move |i| (t, i)))
            .map(|(t, i)| {
                let (a, b) = triangulation.edge(t, i);
                edge_key(a, b)
            })
            .collect();
        if let Some(lost) = triangulation
            .constrained
            .iter()
            .find(|e| !present.contains(e))
        {
            return Err(PlatemeshError::MeshNonConvergence(format!(
                "boundary segment between nodes {} and {} was lost",
                lost.0, lost.1
            )));
        }

        triangulation.legalize_all();
        Ok(triangulation)
    }

    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn boundary_len(&self) -> usize {
        self.boundary_len
    }

    pub fn domain_area(&self) -> f64 {
        self.domain_area
    }

    pub fn area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|t| {
                0.5 * polygon::orient(&self.points[t[0]], &self.points[t[1]], &self.points[t[2]])
            })
            .sum()
    }

    /// Vertices of the edge opposite vertex `i`, in counter-clockwise order
    fn edge(&self, t: usize, i: usize) -> (usize, usize) {
        let v = self.triangles[t];
        (v[(i + 1) % 3], v[(i + 2) % 3])
    }

    fn is_constrained(&self, a: usize, b: usize) -> bool {
        self.constrained.contains(&edge_key(a, b))
    }

    fn link_all(&mut self) -> Result<()> {
        let mut open: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
        self.neighbors = vec![[None; 3]; self.triangles.len()];

        for t in 0..self.triangles.len() {
            for i in 0..3 {
                let (a, b) = self.edge(t, i);
                if let Some((u, j)) = open.remove(&(b, a)) {
                    self.neighbors[t][i] = Some(u);
                    self.neighbors[u][j] = Some(t);
                } else if open.insert((a, b), (t, i)).is_some() {
                    return Err(PlatemeshError::MeshNonConvergence(format!(
                        "edge ({a}, {b}) is used twice in the same direction"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Points the neighbour of `x` across edge `a-b` to `new`
    fn relink(&mut self, x: Option<usize>, a: usize, b: usize, new: usize) {
        let Some(x) = x else {
            return;
        };
        for k in 0..3 {
            let (p, q) = self.edge(x, k);
            if edge_key(p, q) == edge_key(a, b) {
                self.neighbors[x][k] = Some(new);
            }
        }
    }

    /// Splits every ring node no triangle uses into the hull edge spanning it
    ///
    /// Walking each ring from a used node, the unused nodes between two used
    /// nodes `a` and `c` are inserted one after the other into the hull edge
    /// `a-c`, which shrinks to `p-c` after each insertion.
    ///
    /// # Arguments
    /// * `spans` - Start and length of every ring
    /// * `flat` - Dropped zero-area ears as `(end, middle, end)`
    fn restore_ring_nodes(
        &mut self,
        spans: &[(usize, usize)],
        flat: &[(usize, usize, usize)],
    ) -> Result<()> {
        let mut used = vec![false; self.boundary_len];
        for tri in &self.triangles {
            for &v in tri {
                used[v] = true;
            }
        }
        let missing = used.iter().filter(|u| !**u).count();
        if missing == 0 && flat.is_empty() {
            return Ok(());
        }
        debug!("restoring {missing} collinear boundary nodes");

        let mut hull: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
        for t in 0..self.triangles.len() {
            self.register_hull(t, &mut hull);
        }

        for &(a, m, c) in flat {
            if let Some((t, i)) = hull.remove(&edge_key(a, c)) {
                for slot in self.split_hull_edge(t, i, m)? {
                    self.register_hull(slot, &mut hull);
                }
                used[m] = true;
            }
        }

        for &(start, len) in spans {
            let Some(first) = (0..len).find(|&j| used[start + j]) else {
                return Err(PlatemeshError::MeshNonConvergence(format!(
                    "no node of the ring starting at {start} was triangulated"
                )));
            };
            let mut anchor = start + first;
            let mut pending: Vec<usize> = Vec::new();
            for step in 1..=len {
                let v = start + (first + step) % len;
                if !used[v] {
                    pending.push(v);
                    continue;
                }
                let mut a = anchor;
                for &p in &pending {
                    let (t, i) = hull.remove(&edge_key(a, v)).ok_or_else(|| {
                        PlatemeshError::MeshNonConvergence(format!(
                            "boundary node {p} has no hull edge ({a}, {v}) to split"
                        ))
                    })?;
                    for slot in self.split_hull_edge(t, i, p)? {
                        self.register_hull(slot, &mut hull);
                    }
                    used[p] = true;
                    a = p;
                }
                pending.clear();
                anchor = v;
            }
        }

        // a flat ear whose middle node was still used elsewhere leaves two
        // unlinked copies of the edges at that node
        if !flat.is_empty() {
            self.link_all()?;
        }
        Ok(())
    }

    fn register_hull(&self, t: usize, hull: &mut HashMap<(usize, usize), (usize, usize)>) {
        for i in 0..3 {
            if self.neighbors[t][i].is_none() {
                let (a, b) = self.edge(t, i);
                hull.insert(edge_key(a, b), (t, i));
            }
        }
    }

    /// Inserts boundary node `p` into hull edge `i` of triangle `t`,
    /// returning the two triangles that replace it
    fn split_hull_edge(&mut self, t: usize, i: usize, p: usize) -> Result<[usize; 2]> {
        let w = self.triangles[t][i];
        let (a, b) = self.edge(t, i);
        let pts = &self.points;
        if polygon::orient(&pts[w], &pts[a], &pts[p]) <= 0.0
            || polygon::orient(&pts[w], &pts[p], &pts[b]) <= 0.0
        {
            return Err(PlatemeshError::MeshNonConvergence(format!(
                "boundary node {p} does not lie on the edge ({a}, {b})"
            )));
        }

        let opposite_a = self.neighbors[t][(i + 1) % 3];
        let opposite_b = self.neighbors[t][(i + 2) % 3];
        let t2 = self.triangles.len();

        self.triangles[t] = [w, a, p];
        self.neighbors[t] = [None, Some(t2), opposite_b];
        self.triangles.push([w, p, b]);
        self.neighbors.push([None, opposite_a, Some(t)]);
        self.relink(opposite_a, b, w, t2);

        Ok([t, t2])
    }

    fn legalize_all(&mut self) {
        let mut stack: Vec<usize> = (0..self.triangles.len()).collect();
        while let Some(t) = stack.pop() {
            for i in 0..3 {
                if let Some(u) = self.flip_if_illegal(t, i) {
                    stack.push(t);
                    stack.push(u);
                    break;
                }
            }
        }
    }

    /// Flips the edge opposite vertex `i` of `t` when it is not locally
    /// Delaunay, returning the other triangle of the flipped pair
    fn flip_if_illegal(&mut self, t: usize, i: usize) -> Option<usize> {
        let u = self.neighbors[t][i]?;
        let (b, c) = self.edge(t, i);
        if self.is_constrained(b, c) {
            return None;
        }
        let a = self.triangles[t][i];
        let j = (0..3).find(|&j| self.neighbors[u][j] == Some(t))?;
        let d = self.triangles[u][j];

        let pts = &self.points;
        if !polygon::in_circle(&pts[a], &pts[b], &pts[c], &pts[d]) {
            return None;
        }
        if polygon::orient(&pts[a], &pts[b], &pts[d]) <= 0.0
            || polygon::orient(&pts[a], &pts[d], &pts[c]) <= 0.0
        {
            return None;
        }

        let across_ab = self.neighbors[t][(i + 2) % 3];
        let across_ca = self.neighbors[t][(i + 1) % 3];
        let across_bd = self.neighbors[u][(j + 1) % 3];
        let across_dc = self.neighbors[u][(j + 2) % 3];

        self.triangles[t] = [a, b, d];
        self.neighbors[t] = [across_bd, Some(u), across_ab];
        self.triangles[u] = [a, d, c];
        self.neighbors[u] = [across_dc, across_ca, Some(t)];
        self.relink(across_bd, b, d, t);
        self.relink(across_ca, c, a, u);

        Some(u)
    }

    /// Whether every unconstrained edge is locally Delaunay
    pub fn is_constrained_delaunay(&self) -> bool {
        (0..self.triangles.len()).all(|t| {
            (0..3).all(|i| {
                let Some(u) = self.neighbors[t][i] else {
                    return true;
                };
                let (b, c) = self.edge(t, i);
                if self.is_constrained(b, c) {
                    return true;
                }
                let [p0, p1, p2] = self.triangles[t];
                self.triangles[u]
                    .iter()
                    .filter(|&&d| d != b && d != c)
                    .all(|&d| {
                        !polygon::in_circle(
                            &self.points[p0],
                            &self.points[p1],
                            &self.points[p2],
                            &self.points[d],
                        )
                    })
            })
        })
    }

    /// Walks from `start` towards `p` without crossing a ring edge
    fn locate(&self, start: usize, p: &Point2<f64>) -> Option<usize> {
        let mut t = start;
        for _ in 0..=self.triangles.len() {
            let mut next = None;
            for i in 0..3 {
                let (a, b) = self.edge(t, i);
                if polygon::orient(&self.points[a], &self.points[b], p) < 0.0 {
                    if self.is_constrained(a, b) {
                        return None;
                    }
                    next = Some(self.neighbors[t][i]?);
                    break;
                }
            }
            match next {
                Some(u) => t = u,
                None => return Some(t),
            }
        }
        None
    }

    fn is_bad(&self, t: usize, size: &SizeField) -> (bool, bool) {
        let [a, b, c] = self.triangles[t].map(|v| self.points[v]);
        let (_, radius) = circumcircle(&a, &b, &c);
        let shortest = (b - a).norm().min((c - b).norm()).min((a - c).norm());
        let centroid = Point2::from((a.coords + b.coords + c.coords) / 3.0);

        let too_large = radius > SIZE_FACTOR * size.at(&centroid);
        let too_skinny = radius > MAX_RADIUS_EDGE_RATIO * shortest;
        (too_large, too_skinny)
    }

    /// Inserts `p` located in triangle `start` if it is visible and does not
    /// encroach a ring edge. Returns the triangles created.
    fn insert(&mut self, start: usize, p: &Point2<f64>) -> Option<Vec<usize>> {
        let [a, b, c] = self.triangles[start].map(|v| self.points[v]);
        let scale = (b - a).norm().min((c - b).norm()).min((a - c).norm());
        if [a, b, c].iter().any(|v| (v - p).norm() <= 1e-9 * scale) {
            return None;
        }

        let mut cavity = vec![start];
        let mut in_cavity: HashSet<usize> = HashSet::from([start]);
        let mut k = 0;
        while k < cavity.len() {
            let t = cavity[k];
            k += 1;
            for i in 0..3 {
                let Some(u) = self.neighbors[t][i] else {
                    continue;
                };
                let (e0, e1) = self.edge(t, i);
                if in_cavity.contains(&u) || self.is_constrained(e0, e1) {
                    continue;
                }
                let [q0, q1, q2] = self.triangles[u].map(|v| self.points[v]);
                if polygon::in_circle(&q0, &q1, &q2, p) {
                    in_cavity.insert(u);
                    cavity.push(u);
                }
            }
        }

        let mut rim: Vec<(usize, usize, Option<usize>)> = Vec::new();
        for &t in &cavity {
            for i in 0..3 {
                let outside = self.neighbors[t][i];
                if outside.map_or(false, |u| in_cavity.contains(&u)) {
                    continue;
                }
                let (e0, e1) = self.edge(t, i);
                let (q0, q1) = (self.points[e0], self.points[e1]);
                if self.is_constrained(e0, e1) {
                    let midpoint = Point2::from((q0.coords + q1.coords) * 0.5);
                    if (p - midpoint).norm() < 0.5 * (q1 - q0).norm() {
                        return None;
                    }
                }
                if polygon::orient(&q0, &q1, p) <= 0.0 {
                    return None;
                }
                rim.push((e0, e1, outside));
            }
        }
        if rim.len() != cavity.len() + 2 {
            return None;
        }

        let new = self.points.len();
        self.points.push(*p);

        let mut slots = cavity;
        while slots.len() < rim.len() {
            slots.push(self.triangles.len());
            self.triangles.push([0; 3]);
            self.neighbors.push([None; 3]);
        }

        let mut by_start: HashMap<usize, usize> = HashMap::with_capacity(rim.len());
        let mut by_end: HashMap<usize, usize> = HashMap::with_capacity(rim.len());
        for (&slot, &(e0, e1, outside)) in slots.iter().zip(&rim) {
            self.triangles[slot] = [e0, e1, new];
            self.neighbors[slot] = [None, None, outside];
            by_start.insert(e0, slot);
            by_end.insert(e1, slot);
        }
        for (&slot, &(e0, e1, outside)) in slots.iter().zip(&rim) {
            self.neighbors[slot][0] = by_start.get(&e1).copied();
            self.neighbors[slot][1] = by_end.get(&e0).copied();
            self.relink(outside, e0, e1, slot);
        }

        Some(slots)
    }

    /// Inserts interior nodes until no triangle is too large or too skinny
    ///
    /// # Arguments
    /// * `size` - Target element size over the domain
    /// * `max_nodes` - Node budget; exceeding it is a convergence failure
    ///
    /// # Returns
    /// The number of inserted nodes
    pub fn refine(&mut self, size: &SizeField, max_nodes: usize) -> Result<usize> {
        let mut queue: VecDeque<usize> = (0..self.triangles.len()).collect();
        let mut rejected: HashSet<[usize; 3]> = HashSet::new();
        let mut inserted = 0;

        while let Some(t) = queue.pop_front() {
            let key = sorted(self.triangles[t]);
            if rejected.contains(&key) {
                continue;
            }
            let (too_large, too_skinny) = self.is_bad(t, size);
            if !(too_large || too_skinny) {
                continue;
            }

            if self.points.len() >= max_nodes {
                return Err(PlatemeshError::MeshNonConvergence(format!(
                    "refinement exceeded the budget of {max_nodes} nodes"
                )));
            }

            let [a, b, c] = self.triangles[t].map(|v| self.points[v]);
            let (center, _) = circumcircle(&a, &b, &c);
            let mut candidates = vec![center];
            if too_large {
                candidates.push(Point2::from((a.coords + b.coords + c.coords) / 3.0));
            }

            let created = candidates.iter().find_map(|p| {
                let start = self.locate(t, p)?;
                self.insert(start, p)
            });

            match created {
                Some(slots) => {
                    inserted += 1;
                    queue.extend(slots);
                }
                None => {
                    rejected.insert(key);
                }
            }
        }

        debug!(
            "refinement inserted {inserted} nodes, skipped {} triangles",
            rejected.len()
        );
        Ok(inserted)
    }

    /// Fails on inverted triangles or when the triangles do not tile the domain
    pub fn check(&self) -> Result<()> {
        for (t, tri) in self.triangles.iter().enumerate() {
            let o = polygon::orient(&self.points[tri[0]], &self.points[tri[1]], &self.points[tri[2]]);
            if o <= 0.0 {
                return Err(PlatemeshError::MeshNonConvergence(format!(
                    "triangle {t} {tri:?} is inverted"
                )));
            }
        }

        let area = self.area();
        if (area - self.domain_area).abs() > AREA_TOLERANCE * self.domain_area.abs().max(1.0) {
            return Err(PlatemeshError::MeshNonConvergence(format!(
                "triangles cover {area}, domain encloses {}",
                self.domain_area
            )));
        }
        Ok(())
    }
}
